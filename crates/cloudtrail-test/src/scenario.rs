//! CloudTrail test scenarios

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use atmos_component_helper::{CaseContext, Suite, Vars};

use crate::trail::{find_trail, TrailLookup};
use crate::verify::{compare, record, Expectation, TrailOutputs};

/// Component providing the log bucket every trail writes to
pub const DEPENDENCY_COMPONENT: &str = "cloudtrail-bucket";
/// Output of the dependency naming its bucket
pub const BUCKET_OUTPUT: &str = "cloudtrail_bucket_id";
pub const STACK: &str = "default-test";
pub const TEST_REGION: &str = "us-east-2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Account-level trail
    Basic,
    /// Organization trail; needs permissions the test account lacks
    OrgLevel,
    /// Component with `enabled = false`
    Disabled,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Basic, Scenario::OrgLevel, Scenario::Disabled];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Basic => "basic",
            Scenario::OrgLevel => "org-level",
            Scenario::Disabled => "disabled",
        }
    }

    pub fn component(&self) -> &'static str {
        match self {
            Scenario::Basic => "cloudtrail/basic",
            Scenario::OrgLevel => "cloudtrail/org-level",
            Scenario::Disabled => "cloudtrail/disabled",
        }
    }

    pub fn organization_trail(&self) -> bool {
        matches!(self, Scenario::OrgLevel)
    }

    pub fn skip_reason(&self) -> Option<&'static str> {
        match self {
            Scenario::OrgLevel => Some("organization trails are blocked by service control policies in the test account"),
            _ => None,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Register the bucket dependency and every scenario on `suite`
pub fn register(suite: &mut Suite, lookup: Arc<dyn TrailLookup>, stack: &str) {
    suite
        .add_dependency(DEPENDENCY_COMPONENT, stack, Vars::new())
        .empty_bucket_from(BUCKET_OUTPUT);

    for scenario in Scenario::ALL {
        let lookup = lookup.clone();
        let stack = stack.to_string();
        let case = match scenario {
            Scenario::Disabled => suite.test(scenario.name(), move |case| disabled(case, scenario, stack)),
            _ => suite.test(scenario.name(), move |case| trail(case, scenario, lookup, stack)),
        };
        if let Some(reason) = scenario.skip_reason() {
            case.skip(reason);
        }
    }
}

/// Deploy, compare outputs with the live trail, then check for drift
async fn trail(case: CaseContext, scenario: Scenario, lookup: Arc<dyn TrailLookup>, stack: String) -> anyhow::Result<()> {
    let deployment = case.deploy(scenario.component(), &stack, Vars::new()).await?;
    let outputs = TrailOutputs::read(&case, &deployment)?;

    let live = find_trail(&*lookup, case.call_context(), &outputs.id)
        .await
        .with_context(|| format!("looking up trail {}", outputs.id))?;

    let expected = Expectation {
        region: case.region().to_string(),
        organization_trail: scenario.organization_trail(),
    };
    let checks = compare(&outputs, &live, &expected);
    let failed = record(&case, &checks);
    info!("[{}] {}/{} trail checks passed", case.name(), checks.len() - failed, checks.len());

    case.drift_test(&deployment).await?;
    Ok(())
}

async fn disabled(case: CaseContext, scenario: Scenario, stack: String) -> anyhow::Result<()> {
    case.verify_enabled_flag(scenario.component(), &stack, Vars::new()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Scenario::Basic, "cloudtrail/basic", false ; "basic")]
    #[test_case(Scenario::OrgLevel, "cloudtrail/org-level", true ; "org level")]
    #[test_case(Scenario::Disabled, "cloudtrail/disabled", false ; "disabled")]
    fn test_scenario_targets(scenario: Scenario, component: &str, org: bool) {
        assert_eq!(scenario.component(), component);
        assert_eq!(scenario.organization_trail(), org);
    }

    #[test]
    fn test_only_org_level_is_skipped() {
        let skipped: Vec<_> = Scenario::ALL.iter().filter(|s| s.skip_reason().is_some()).collect();
        assert_eq!(skipped, vec![&Scenario::OrgLevel]);
    }
}
