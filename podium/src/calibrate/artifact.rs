//! Versioned persistence of the published [CalibrationParameterSet].

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::calibrate::{CalibrationError, CalibrationParameterSet, CalibrationStatus};
use crate::error::InvalidConfiguration;
use crate::file::{read_json_opt, write_json_atomic};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    path: PathBuf,
}
impl ArtifactStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The published set, or `None` if nothing has been published yet.
    pub fn load(&self) -> Result<Option<CalibrationParameterSet>, CalibrationError> {
        let loaded: Option<CalibrationParameterSet> = read_json_opt(&self.path)?;
        if let Some(set) = &loaded {
            set.validate().map_err(InvalidConfiguration)?;
        }
        Ok(loaded)
    }

    /// The published set, falling back to the identity set if nothing has been published.
    pub fn load_or_identity(&self) -> Result<CalibrationParameterSet, CalibrationError> {
        match self.load()? {
            Some(set) => {
                debug!(
                    "loaded calibration v{} from {}",
                    set.metadata.version,
                    self.path.display()
                );
                Ok(set)
            }
            None => {
                debug!(
                    "no calibration at {}; using the identity set",
                    self.path.display()
                );
                Ok(CalibrationParameterSet::identity())
            }
        }
    }

    /// Publishes `set` as the next version. The previous artifact is replaced in a single rename,
    /// so readers never observe a partial write. Sets from a cancelled run are refused.
    pub fn publish(
        &self,
        mut set: CalibrationParameterSet,
    ) -> Result<CalibrationParameterSet, CalibrationError> {
        if set.metadata.status == Some(CalibrationStatus::Cancelled) {
            return Err(CalibrationError::Cancelled);
        }
        set.validate().map_err(InvalidConfiguration)?;
        let previous = self.load()?.map(|set| set.metadata.version).unwrap_or(0);
        set.metadata.version = previous + 1;
        write_json_atomic(&self.path, &set)?;
        info!(
            "published calibration v{} to {}",
            set.metadata.version,
            self.path.display()
        );
        Ok(set)
    }
}
