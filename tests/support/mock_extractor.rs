use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use trackfs::extract::{ExtractError, ExtractRequest, TrackExtractor};

/// Extractor that writes `size` filler bytes and counts its calls
pub struct CountingExtractor {
    calls: AtomicUsize,
    delay: Duration,
    size: usize,
    fail: AtomicBool,
    extracted: Mutex<Vec<u32>>,
}

impl CountingExtractor {
    pub fn new(size: usize) -> Self {
        CountingExtractor {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            size,
            fail: AtomicBool::new(false),
            extracted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Track numbers extracted so far, in order
    pub fn extracted(&self) -> Vec<u32> {
        self.extracted.lock().unwrap().clone()
    }
}

impl TrackExtractor for CountingExtractor {
    fn extract(&self, request: &ExtractRequest, output: &Path) -> Result<(), ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExtractError::ToolFailed {
                tool: "mock".to_string(),
                status: "exit status: 1".to_string(),
            });
        }
        std::fs::write(output, vec![request.num as u8; self.size])?;
        self.extracted.lock().unwrap().push(request.num);
        Ok(())
    }
}
