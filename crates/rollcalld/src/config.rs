use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address the HTTP API binds to.
    pub bind_addr: String,
    /// V4L2 device path.
    pub camera_device: String,
    /// Path to the ONNX face detection model.
    pub detector_model_path: PathBuf,
    /// Root of the face sample folder tree.
    pub faces_dir: PathBuf,
    /// Directory holding the per-day attendance CSV files.
    pub ledger_dir: PathBuf,
    /// Path of the persisted classifier artifact.
    pub model_path: PathBuf,
    /// Path to the SQLite account database.
    pub db_path: PathBuf,
    /// Neighbor count for the classifier.
    pub knn_k: usize,
    /// Samples captured per enrollment session.
    pub max_samples: usize,
    /// Frames consumed per enrollment session before giving up.
    pub enroll_frame_budget: usize,
    /// Frames consumed per marking attempt before giving up.
    pub mark_frame_budget: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults under the XDG data directory.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Self {
            bind_addr: std::env::var("ROLLCALL_BIND")
                .unwrap_or_else(|_| "127.0.0.1:8448".to_string()),
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            detector_model_path: std::env::var("ROLLCALL_DETECTOR_MODEL")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("models/det_10g.onnx")),
            faces_dir: data_dir.join("faces"),
            ledger_dir: data_dir.join("Attendance"),
            model_path: data_dir.join("face_model.json"),
            db_path: std::env::var("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("accounts.db")),
            knn_k: env_usize("ROLLCALL_KNN_K", rollcall_core::DEFAULT_K),
            max_samples: env_usize("ROLLCALL_MAX_SAMPLES", rollcall_core::DEFAULT_MAX_SAMPLES),
            enroll_frame_budget: env_usize("ROLLCALL_ENROLL_FRAME_BUDGET", 600),
            mark_frame_budget: env_usize("ROLLCALL_MARK_FRAME_BUDGET", 150),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
