use std::fs;
use std::io;
use std::path::PathBuf;

use adscout_core::ScoutRun;
use adscout_engine::{ensure_dir, hashed_component, AtomicFileWriter, AuditError, RunAudit};
use adscout_logging::{scout_debug, scout_warn};

const MAX_STEM_LEN: usize = 64;

/// Keeps the latest run of every scout as `<dir>/<scout id>-<hash>.ron`.
pub struct RonRunAudit {
    writer: AtomicFileWriter,
}

impl RonRunAudit {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let dir = dir.into();
        ensure_dir(&dir).map_err(|err| AuditError::new(err.to_string()))?;
        Ok(Self {
            writer: AtomicFileWriter::new(dir),
        })
    }

    fn file_name(scout_id: &str) -> String {
        format!("{}.ron", hashed_component(scout_id, MAX_STEM_LEN))
    }
}

impl RunAudit for RonRunAudit {
    fn last_run(&self, scout_id: &str) -> Result<Option<ScoutRun>, AuditError> {
        let path = self.writer.dir().join(Self::file_name(scout_id));
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuditError::new(format!("{}: {err}", path.display()))),
        };
        let run: ScoutRun = ron::from_str(&text)
            .map_err(|err| AuditError::new(format!("{}: {err}", path.display())))?;
        // Hashes of different ids can still collide.
        if run.scout_id != scout_id {
            scout_warn!(
                "{:?} holds the run of {}, not {}",
                path,
                run.scout_id,
                scout_id
            );
            return Ok(None);
        }
        Ok(Some(run))
    }

    fn record(&self, run: &ScoutRun) -> Result<(), AuditError> {
        let text = ron::ser::to_string_pretty(run, ron::ser::PrettyConfig::new())
            .map_err(|err| AuditError::new(err.to_string()))?;
        let path = self
            .writer
            .write(&Self::file_name(&run.scout_id), text.as_bytes())
            .map_err(|err| AuditError::new(err.to_string()))?;
        scout_debug!("Recorded run of {} in {:?}", run.scout_id, path);
        Ok(())
    }
}
