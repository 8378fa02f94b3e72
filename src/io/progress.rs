use std::sync::{Mutex, OnceLock};

type DownloadCb = Box<dyn Fn(u64, u64) + Send + 'static>;
type SplitCb = Box<dyn Fn(SplitProgress) + Send + 'static>;

static DOWNLOAD_PROGRESS_CB: OnceLock<Mutex<Option<DownloadCb>>> = OnceLock::new();
static SPLIT_PROGRESS_CB: OnceLock<Mutex<Option<SplitCb>>> = OnceLock::new();

/// Progress of a single separation job.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitProgress {
    /// One of `resolve_model`, `engine_preload`, `read_audio`, `infer`, `write_stems`, `finalize`.
    Stage(&'static str),
    Chunks {
        done: usize,
        total: usize,
        percent: f32,
    },
    Writing {
        stem: &'static str,
        done: usize,
        total: usize,
        percent: f32,
    },
    Finished,
}

pub fn set_download_progress_callback(cb: impl Fn(u64, u64) + Send + 'static) {
    let slot = DOWNLOAD_PROGRESS_CB.get_or_init(|| Mutex::new(None));
    if let Ok(mut g) = slot.lock() {
        *g = Some(Box::new(cb));
    }
}

pub fn emit_download_progress(done: u64, total: u64) {
    if let Some(m) = DOWNLOAD_PROGRESS_CB.get() {
        if let Ok(g) = m.lock() {
            if let Some(cb) = &*g {
                cb(done, total);
            }
        }
    }
}

pub fn set_split_progress_callback(cb: impl Fn(SplitProgress) + Send + 'static) {
    let slot = SPLIT_PROGRESS_CB.get_or_init(|| Mutex::new(None));
    if let Ok(mut g) = slot.lock() {
        *g = Some(Box::new(cb));
    }
}

pub fn emit_split_progress(progress: SplitProgress) {
    if let Some(m) = SPLIT_PROGRESS_CB.get() {
        if let Ok(g) = m.lock() {
            if let Some(cb) = &*g {
                cb(progress);
            }
        }
    }
}
