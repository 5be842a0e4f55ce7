//! Head sampling for enrichment traces.
//!
//! Decisions are made once per trace, at its root span, and inherited by
//! every child through [`TraceContext::sampled`]. The ratio test uses the
//! low 8 bytes of the trace id, so all processes sharing a trace agree.

use crate::config::SamplerConfig;

use super::span::{TraceContext, TraceId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampler {
    AlwaysOn,
    AlwaysOff,
    TraceIdRatio { ratio: f64 },
    ParentBased { ratio: f64 },
}

impl Sampler {
    pub fn from_config(config: &SamplerConfig) -> Self {
        match config {
            SamplerConfig::AlwaysOn => Sampler::AlwaysOn,
            SamplerConfig::AlwaysOff => Sampler::AlwaysOff,
            SamplerConfig::TraceIdRatio { ratio } => Sampler::TraceIdRatio { ratio: *ratio },
            SamplerConfig::ParentBased { ratio } => Sampler::ParentBased { ratio: *ratio },
        }
    }

    /// Decide whether a span in `trace_id` under `parent` is recorded.
    pub fn should_sample(&self, parent: Option<&TraceContext>, trace_id: TraceId) -> bool {
        match self {
            Sampler::AlwaysOn => true,
            Sampler::AlwaysOff => false,
            Sampler::TraceIdRatio { ratio } => ratio_sample(*ratio, trace_id),
            Sampler::ParentBased { ratio } => match parent {
                Some(parent) => parent.sampled,
                None => ratio_sample(*ratio, trace_id),
            },
        }
    }
}

fn ratio_sample(ratio: f64, trace_id: TraceId) -> bool {
    if ratio >= 1.0 {
        return true;
    }
    if ratio <= 0.0 || ratio.is_nan() {
        return false;
    }
    let bytes = trace_id.to_bytes();
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[8..16]);
    let value = u64::from_be_bytes(low) >> 1;
    let bound = (ratio * (1u64 << 63) as f64) as u64;
    value < bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::span::SpanId;

    fn trace_with_low(low: u64) -> TraceId {
        let mut bytes = [0u8; 16];
        bytes[0] = 1;
        bytes[8..16].copy_from_slice(&low.to_be_bytes());
        TraceId::from_bytes(bytes)
    }

    #[test]
    fn test_always_on_off() {
        let id = TraceId::random();
        assert!(Sampler::AlwaysOn.should_sample(None, id));
        assert!(!Sampler::AlwaysOff.should_sample(None, id));
    }

    #[test]
    fn test_ratio_is_deterministic_by_trace_id() {
        let sampler = Sampler::TraceIdRatio { ratio: 0.5 };
        assert!(sampler.should_sample(None, trace_with_low(0)));
        assert!(!sampler.should_sample(None, trace_with_low(u64::MAX)));
    }

    #[test]
    fn test_ratio_roughly_matches() {
        let sampler = Sampler::TraceIdRatio { ratio: 0.25 };
        let kept = (0..4000)
            .filter(|_| sampler.should_sample(None, TraceId::random()))
            .count();
        assert!((700..1300).contains(&kept), "kept {kept} of 4000");
    }

    #[test]
    fn test_parent_based_follows_parent() {
        let sampler = Sampler::ParentBased { ratio: 0.0 };
        let sampled = TraceContext::new(TraceId::random(), SpanId::random(), true);
        let dropped = TraceContext::new(TraceId::random(), SpanId::random(), false);

        assert!(sampler.should_sample(Some(&sampled), sampled.trace_id));
        assert!(!sampler.should_sample(Some(&dropped), dropped.trace_id));
        assert!(!sampler.should_sample(None, TraceId::random()));
    }

    #[test]
    fn test_from_config() {
        assert_eq!(
            Sampler::from_config(&SamplerConfig::default()),
            Sampler::ParentBased { ratio: 1.0 }
        );
    }
}
