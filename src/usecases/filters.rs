//! Envelope filters applied before routed events reach aggregation.

use crate::domain::Envelope;

pub trait EnvelopeFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn pass(&self, env: &Envelope) -> bool;
}

/// Drops envelopes authored by this account.
pub struct NotOut;

impl EnvelopeFilter for NotOut {
    fn name(&self) -> &'static str {
        "not_out"
    }

    fn pass(&self, env: &Envelope) -> bool {
        !env.is_outbound()
    }
}

/// Drops envelopes without a sender.
pub struct RequireSender;

impl EnvelopeFilter for RequireSender {
    fn name(&self) -> &'static str {
        "require_sender"
    }

    fn pass(&self, env: &Envelope) -> bool {
        !env.sender_id.trim().is_empty()
    }
}

/// All filters in order; the first rejection wins.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn EnvelopeFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// `NotOut` then `RequireSender`.
    pub fn standard() -> Self {
        Self::new().with(NotOut).with(RequireSender)
    }

    pub fn with(mut self, filter: impl EnvelopeFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Name of the first filter rejecting `env`, or `None` when it passes.
    pub fn rejected_by(&self, env: &Envelope) -> Option<&'static str> {
        self.filters.iter().find(|f| !f.pass(env)).map(|f| f.name())
    }

    pub fn pass(&self, env: &Envelope) -> bool {
        self.rejected_by(env).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;

    #[test]
    fn test_standard_chain() {
        let chain = FilterChain::standard();
        let ok = Envelope::message(Direction::In, "1@s.whatsapp.net", "1@s.whatsapp.net", "A", "hi");
        assert!(chain.pass(&ok));

        let out = Envelope::message(Direction::Out, "1@s.whatsapp.net", "", "B", "hi");
        assert_eq!(chain.rejected_by(&out), Some("not_out"));

        let anon = Envelope::message(Direction::In, "1@s.whatsapp.net", " ", "C", "hi");
        assert_eq!(chain.rejected_by(&anon), Some("require_sender"));
    }

    #[test]
    fn test_empty_chain_passes_everything() {
        assert!(FilterChain::new().pass(&Envelope::new("receipt")));
    }
}
