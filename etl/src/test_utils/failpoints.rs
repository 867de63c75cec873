use fail::FailScenario;

/// Enables failpoints for the lifetime of the guard.
///
/// Dropping the guard removes every configured failpoint and tears down the scenario, so a
/// failing assertion does not leak actions into other tests.
pub struct FailpointGuard<'a> {
    _scenario: FailScenario<'a>,
    names: Vec<String>,
}

impl<'a> FailpointGuard<'a> {
    /// Configures each `(name, action)` pair, for example `("merge.after_apply_before_commit", "return")`.
    pub fn configure(failpoints: &[(&str, &str)]) -> FailpointGuard<'a> {
        let scenario = FailScenario::setup();

        let mut names = Vec::with_capacity(failpoints.len());
        for (name, action) in failpoints {
            fail::cfg(*name, action).expect("failed to configure failpoint");
            names.push(name.to_string());
        }

        Self {
            _scenario: scenario,
            names,
        }
    }

    /// Disables a single failpoint before the guard is dropped.
    pub fn disable(&mut self, name: &str) {
        fail::remove(name);
        self.names.retain(|configured| configured != name);
    }
}

impl Drop for FailpointGuard<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            fail::remove(name);
        }
    }
}
