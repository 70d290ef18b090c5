//! The MessageRecorder is used to log frames exchanged between the client and
//! the server.
//! Recording is enabled by setting the environment variable TQAPI_RECORDING_DIR
//! to the path where frames are stored, e.g. /tmp/frames
//! /tmp/frames/2017-06-05-09-30-0/0001-request.msg
//! /tmp/frames/2017-06-05-09-30-0/0002-response.msg

use std::env;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::warn;
use time::macros::format_description;
use time::OffsetDateTime;

pub(crate) const RECORDING_DIR_VAR: &str = "TQAPI_RECORDING_DIR";

static RECORDING_SEQ: AtomicUsize = AtomicUsize::new(0);
static RECORDER_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Debug)]
pub(crate) struct MessageRecorder {
    enabled: bool,
    recording_dir: String,
}

impl MessageRecorder {
    pub fn new(enabled: bool, recording_dir: String) -> Self {
        Self { enabled, recording_dir }
    }

    pub fn disabled() -> Self {
        Self::new(false, String::new())
    }

    pub fn from_env() -> Self {
        let dir = match env::var(RECORDING_DIR_VAR) {
            Ok(dir) if !dir.is_empty() => dir,
            _ => return Self::disabled(),
        };

        let format = format_description!("[year]-[month]-[day]-[hour]-[minute]");
        let now = match OffsetDateTime::now_utc().format(&format) {
            Ok(now) => now,
            Err(e) => {
                warn!("recording disabled, could not format timestamp: {e}");
                return Self::disabled();
            }
        };
        let instance_id = RECORDER_ID.fetch_add(1, Ordering::SeqCst);
        let recording_dir = format!("{dir}/{now}-{instance_id}");

        if let Err(e) = fs::create_dir_all(&recording_dir) {
            warn!("recording disabled, could not create {recording_dir}: {e}");
            return Self::disabled();
        }

        MessageRecorder::new(true, recording_dir)
    }

    pub fn record_request(&self, body: &[u8]) {
        self.record("request", body);
    }

    pub fn record_response(&self, body: &[u8]) {
        self.record("response", body);
    }

    fn record(&self, direction: &str, body: &[u8]) {
        if !self.enabled {
            return;
        }

        let record_id = RECORDING_SEQ.fetch_add(1, Ordering::SeqCst);
        let path = format!("{}/{:04}-{}.msg", self.recording_dir, record_id, direction);

        if let Err(e) = fs::write(&path, body) {
            warn!("could not record {direction} to {path}: {e}");
        }
    }
}
