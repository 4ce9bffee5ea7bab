//! Diagnostic trace accumulated while deciding.
use std::fmt::Display;

/// Ordered reasons explaining a decision.
///
/// Errors are always kept. Informational messages are kept only when the caller asked for them
/// (`include_reasons`); both are logged regardless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionReasons {
    errors: Vec<String>,
    infos: Option<Vec<String>>,
}

impl DecisionReasons {
    /// Create an empty trace. `include_infos` controls whether informational messages are kept.
    pub fn new(include_infos: bool) -> DecisionReasons {
        DecisionReasons {
            errors: Vec::new(),
            infos: include_infos.then(Vec::new),
        }
    }

    /// Record an anomaly.
    pub fn add_error(&mut self, error: impl Display) {
        let message = error.to_string();
        log::warn!(target: "decision_core", "{message}");
        self.errors.push(message);
    }

    /// Record an informational message. Nothing is formatted unless the message is kept or debug
    /// logging is enabled.
    pub fn add_info(&mut self, info: impl Display) {
        if self.infos.is_none() && !log::log_enabled!(target: "decision_core", log::Level::Debug) {
            return;
        }
        let message = info.to_string();
        log::debug!(target: "decision_core", "{message}");
        if let Some(infos) = &mut self.infos {
            infos.push(message);
        }
    }

    /// Recorded anomalies.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Kept informational messages. Empty when infos are not included.
    pub fn infos(&self) -> &[String] {
        self.infos.as_deref().unwrap_or_default()
    }

    /// Errors first, then infos.
    pub fn to_report(&self) -> Vec<String> {
        self.errors
            .iter()
            .chain(self.infos())
            .cloned()
            .collect()
    }
}

/// A decision result together with the reasons that led to it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionResponse<T> {
    /// The decision.
    pub result: T,
    /// Trace explaining the decision.
    pub reasons: DecisionReasons,
}

impl<T> DecisionResponse<T> {
    /// Pair `result` with its `reasons`.
    pub fn new(result: T, reasons: DecisionReasons) -> DecisionResponse<T> {
        DecisionResponse { result, reasons }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn errors_are_always_kept() {
        let mut reasons = DecisionReasons::new(false);
        reasons.add_error("error1");
        reasons.add_info("info1");

        assert_eq!(reasons.to_report(), vec!["error1"]);
        assert!(reasons.infos().is_empty());
    }

    #[test]
    fn report_lists_errors_before_infos() {
        let mut reasons = DecisionReasons::new(true);
        reasons.add_info("info1");
        reasons.add_error("error1");
        reasons.add_info("info2");
        reasons.add_error("error2");

        assert_eq!(
            reasons.to_report(),
            vec!["error1", "error2", "info1", "info2"]
        );
    }

    /// Counts how many times it is rendered.
    struct Counting<'a>(&'a Cell<usize>);

    impl Display for Counting<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.set(self.0.get() + 1);
            f.write_str("info")
        }
    }

    #[test]
    fn excluded_infos_are_not_formatted() {
        let renders = Cell::new(0);
        let mut reasons = DecisionReasons::new(false);
        for _ in 0..100 {
            reasons.add_info(Counting(&renders));
        }

        let logged = log::log_enabled!(target: "decision_core", log::Level::Debug);
        assert_eq!(renders.get(), if logged { 100 } else { 0 });
        assert!(reasons.infos().is_empty());
    }

    #[test]
    fn included_infos_are_formatted_once() {
        let renders = Cell::new(0);
        let mut reasons = DecisionReasons::new(true);
        reasons.add_info(Counting(&renders));

        assert_eq!(renders.get(), 1);
        assert_eq!(reasons.infos(), ["info".to_owned()]);
    }
}
