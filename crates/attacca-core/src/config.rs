//! Engine configuration.

use crate::buffer::MAX_ENGINE_CV_IO_PORTS;
use crate::error::{EngineError, EngineResult};

/// Highest number of cores the track graph will be spread over.
pub const MAX_RT_CORES: usize = 8;

/// Configuration for the audio engine, set by the host before processing.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub sample_rate: f32,
    /// Number of cpu cores to use for audio processing. 1 means all
    /// processing happens in the audio callback itself; more cores spread
    /// tracks over a worker pool.
    pub rt_cpu_cores: usize,
    pub input_clip_detection: bool,
    pub output_clip_detection: bool,
    pub cv_inputs: usize,
    pub cv_outputs: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            rt_cpu_cores: 1,
            input_clip_detection: false,
            output_clip_detection: false,
            cv_inputs: 0,
            cv_outputs: 0,
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.sample_rate < 8_000.0 || self.sample_rate > 384_000.0 {
            return Err(EngineError::InvalidConfig(
                "sample_rate out of range (8000-384000 Hz)",
            ));
        }
        if self.rt_cpu_cores == 0 || self.rt_cpu_cores > MAX_RT_CORES {
            return Err(EngineError::InvalidConfig("rt_cpu_cores out of range"));
        }
        if self.cv_inputs > MAX_ENGINE_CV_IO_PORTS || self.cv_outputs > MAX_ENGINE_CV_IO_PORTS {
            return Err(EngineError::InvalidConfig("too many cv ports"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HostConfig::default();
        assert_eq!(config.sample_rate, 48_000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut config = HostConfig {
            sample_rate: 100.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.sample_rate = 48_000.0;
        config.rt_cpu_cores = 0;
        assert!(config.validate().is_err());

        config.rt_cpu_cores = 1;
        config.cv_inputs = MAX_ENGINE_CV_IO_PORTS + 1;
        assert!(config.validate().is_err());
    }
}
