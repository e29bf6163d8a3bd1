//! Acquisition requests and start outcomes.

use clamp_core::channel::{AdcChannel, DacChannel};
use clamp_core::error::{ClampError, Result};
use clamp_core::transport::{AcquisitionMode, SampleInterval};

/// What the client asks [`AcquisitionEngine::start`](super::AcquisitionEngine::start)
/// for.
///
/// In a pulsed request `dac_samples`/`adc_samples` are the full stimulus and
/// record lengths. In a continuous request they are the lengths of the
/// initial stimulus and of the client's ADC buffer; the session then runs
/// until halted.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    /// Requested DAC list, in order.
    pub dac_channels: Vec<DacChannel>,
    /// Requested ADC list, in order.
    pub adc_channels: Vec<AdcChannel>,
    /// Stimulus samples per DAC channel.
    pub dac_samples: usize,
    /// Samples per ADC channel.
    pub adc_samples: usize,
    /// Mode flags.
    pub mode: AcquisitionMode,
    /// Requested sample interval in seconds.
    pub interval_s: f64,
    /// Stream until halted instead of stopping after one record.
    pub read_continuously: bool,
    /// The initial stimulus is the whole stimulus.
    pub set_stim_end: bool,
    /// Ask for the blocking low-latency path.
    pub immediate: bool,
}

impl Default for AcquisitionRequest {
    fn default() -> Self {
        Self {
            dac_channels: Vec::new(),
            adc_channels: Vec::new(),
            dac_samples: 0,
            adc_samples: 0,
            mode: AcquisitionMode::empty(),
            interval_s: 1e-4,
            read_continuously: false,
            set_stim_end: false,
            immediate: false,
        }
    }
}

impl AcquisitionRequest {
    /// Create a new builder.
    pub fn builder() -> AcquisitionRequestBuilder {
        AcquisitionRequestBuilder::default()
    }

    /// Check sample counts and flag combinations that do not depend on the
    /// board.
    pub fn validate(&self) -> Result<()> {
        if self.adc_samples == 0 && !self.adc_channels.is_empty() {
            return Err(ClampError::InvalidBuffer(
                "ADC sample count must be positive".to_string(),
            ));
        }
        if self.mode.contains(AcquisitionMode::ENABLE_DAC_OUTPUT) {
            if self.dac_channels.is_empty() {
                return Err(ClampError::UnsupportedCombination(
                    "DAC output enabled without DAC channels".to_string(),
                ));
            }
            if self.dac_samples == 0 {
                return Err(ClampError::InvalidBuffer(
                    "DAC output enabled with an empty stimulus".to_string(),
                ));
            }
        }
        if !self.read_continuously && self.adc_samples == 0 && self.dac_samples == 0 {
            return Err(ClampError::InvalidBuffer(
                "pulsed acquisition needs a sample count".to_string(),
            ));
        }
        if self.read_continuously && self.adc_channels.is_empty() {
            return Err(ClampError::UnsupportedCombination(
                "continuous acquisition needs at least one ADC channel".to_string(),
            ));
        }
        if !(self.interval_s.is_finite() && self.interval_s > 0.0) {
            return Err(ClampError::InvalidParameter(format!(
                "sample interval must be positive, got {}",
                self.interval_s
            )));
        }
        Ok(())
    }

    /// Whether DAC output is enabled.
    pub fn drives_dac(&self) -> bool {
        self.mode.contains(AcquisitionMode::ENABLE_DAC_OUTPUT)
    }

    /// Planned duration of a pulsed acquisition at `interval`.
    pub fn duration_s(&self, interval: SampleInterval) -> f64 {
        self.dac_samples.max(self.adc_samples) as f64 * interval.seconds
    }
}

/// Builder for [`AcquisitionRequest`].
#[derive(Debug, Default)]
pub struct AcquisitionRequestBuilder {
    request: AcquisitionRequest,
}

impl AcquisitionRequestBuilder {
    /// Set the DAC list.
    pub fn dac_channels(mut self, channels: &[DacChannel]) -> Self {
        self.request.dac_channels = channels.to_vec();
        self
    }

    /// Set the ADC list.
    pub fn adc_channels(mut self, channels: &[AdcChannel]) -> Self {
        self.request.adc_channels = channels.to_vec();
        self
    }

    /// Set the stimulus length per DAC channel.
    pub fn dac_samples(mut self, samples: usize) -> Self {
        self.request.dac_samples = samples;
        self
    }

    /// Set the record (or buffer) length per ADC channel.
    pub fn adc_samples(mut self, samples: usize) -> Self {
        self.request.adc_samples = samples;
        self
    }

    /// Set both lengths at once.
    pub fn samples(self, samples: usize) -> Self {
        self.dac_samples(samples).adc_samples(samples)
    }

    /// Set the mode flags.
    pub fn mode(mut self, mode: AcquisitionMode) -> Self {
        self.request.mode = mode;
        self
    }

    /// Set the requested sample interval in seconds.
    pub fn interval(mut self, seconds: f64) -> Self {
        self.request.interval_s = seconds;
        self
    }

    /// Stream until halted.
    pub fn continuous(mut self, enable: bool) -> Self {
        self.request.read_continuously = enable;
        self
    }

    /// Mark the initial stimulus as complete.
    pub fn set_stim_end(mut self, enable: bool) -> Self {
        self.request.set_stim_end = enable;
        self
    }

    /// Ask for the immediate path.
    pub fn immediate(mut self, enable: bool) -> Self {
        self.request.immediate = enable;
        self
    }

    /// Build the request.
    pub fn build(self) -> Result<AcquisitionRequest> {
        self.request.validate()?;
        Ok(self.request)
    }
}

/// What [`AcquisitionEngine::start`](super::AcquisitionEngine::start)
/// actually did.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOutcome {
    /// Granted sample interval.
    pub interval: SampleInterval,
    /// Physical DAC channel count.
    pub physical_dac: usize,
    /// Physical ADC channel count.
    pub physical_adc: usize,
    /// Stimulus end in effect (forced for pulsed sessions).
    pub set_stim_end: bool,
    /// The immediate path was granted.
    pub immediate: bool,
    /// ADC data of an immediate acquisition, one vector per requested ADC
    /// channel. `None` on the streaming path.
    pub data: Option<Vec<Vec<i16>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let request = AcquisitionRequest::builder()
            .dac_channels(&[DacChannel::Analog(0)])
            .adc_channels(&[AdcChannel::Analog(0), AdcChannel::Analog(1)])
            .samples(1000)
            .mode(AcquisitionMode::ENABLE_DAC_OUTPUT)
            .interval(2e-5)
            .build()
            .unwrap();
        assert_eq!(request.dac_samples, 1000);
        assert_eq!(request.adc_channels.len(), 2);
        assert!(request.drives_dac());
        assert!(!request.read_continuously);
    }

    #[test]
    fn test_validation() {
        // DAC output without DAC channels
        let result = AcquisitionRequest::builder()
            .adc_channels(&[AdcChannel::Analog(0)])
            .samples(10)
            .mode(AcquisitionMode::ENABLE_DAC_OUTPUT)
            .build();
        assert!(matches!(result, Err(ClampError::UnsupportedCombination(_))));

        // Empty record
        let result = AcquisitionRequest::builder()
            .adc_channels(&[AdcChannel::Analog(0)])
            .build();
        assert!(matches!(result, Err(ClampError::InvalidBuffer(_))));

        // Zero interval
        let result = AcquisitionRequest::builder()
            .adc_channels(&[AdcChannel::Analog(0)])
            .adc_samples(10)
            .interval(0.0)
            .build();
        assert!(matches!(result, Err(ClampError::InvalidParameter(_))));
    }

    #[test]
    fn test_duration() {
        let request = AcquisitionRequest::builder()
            .adc_channels(&[AdcChannel::Analog(0)])
            .adc_samples(500)
            .build()
            .unwrap();
        let interval = SampleInterval {
            ticks: 100,
            seconds: 1e-4,
        };
        assert!((request.duration_s(interval) - 0.05).abs() < 1e-12);
    }
}
