//! Comparison of component outputs with the live trail

use serde::Serialize;

use atmos_component_helper::{CaseContext, Deployment, HarnessResult};

use crate::trail::TrailRecord;

pub const OUTPUT_ID: &str = "cloudtrail_id";
pub const OUTPUT_ARN: &str = "cloudtrail_arn";
pub const OUTPUT_LOG_GROUP_ARN: &str = "cloudtrail_logs_log_group_arn";
pub const OUTPUT_LOG_GROUP_NAME: &str = "cloudtrail_logs_log_group_name";
pub const OUTPUT_ROLE_ARN: &str = "cloudtrail_logs_role_arn";
pub const OUTPUT_ROLE_NAME: &str = "cloudtrail_logs_role_name";
pub const OUTPUT_HOME_REGION: &str = "cloudtrail_home_region";

/// Outputs of the cloudtrail component
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrailOutputs {
    pub id: String,
    pub arn: String,
    pub log_group_arn: String,
    pub log_group_name: String,
    pub role_arn: String,
    pub role_name: String,
    pub home_region: String,
}

impl TrailOutputs {
    /// Read every output; any missing key aborts the case
    pub fn read(case: &CaseContext, deployment: &Deployment) -> HarnessResult<Self> {
        Ok(Self {
            id: case.output(deployment, OUTPUT_ID)?,
            arn: case.output(deployment, OUTPUT_ARN)?,
            log_group_arn: case.output(deployment, OUTPUT_LOG_GROUP_ARN)?,
            log_group_name: case.output(deployment, OUTPUT_LOG_GROUP_NAME)?,
            role_arn: case.output(deployment, OUTPUT_ROLE_ARN)?,
            role_name: case.output(deployment, OUTPUT_ROLE_NAME)?,
            home_region: case.output(deployment, OUTPUT_HOME_REGION)?,
        })
    }
}

/// What the scenario expects of the trail
#[derive(Debug, Clone)]
pub struct Expectation {
    pub region: String,
    pub organization_trail: bool,
}

/// Outcome of one field comparison
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldCheck {
    pub field: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl FieldCheck {
    fn new(field: &'static str, passed: bool, detail: String) -> Self {
        Self { field, passed, detail }
    }
}

fn live(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<unset>")
}

/// Compare the component outputs with the live trail
pub fn compare(outputs: &TrailOutputs, record: &TrailRecord, expected: &Expectation) -> Vec<FieldCheck> {
    let mut checks = Vec::with_capacity(8);

    checks.push(FieldCheck::new(
        "trail_arn",
        record.trail_arn.as_deref() == Some(outputs.arn.as_str()),
        format!("trail ARN: output {} vs live {}", outputs.arn, live(&record.trail_arn)),
    ));

    // The live ARN carries a ":*" suffix, so the output must be a strict prefix.
    let live_group = live(&record.log_group_arn);
    checks.push(FieldCheck::new(
        "log_group_arn",
        !outputs.log_group_arn.is_empty()
            && record
                .log_group_arn
                .as_deref()
                .is_some_and(|arn| arn.len() > outputs.log_group_arn.len() && arn.starts_with(&outputs.log_group_arn)),
        format!(
            "log group ARN: output {} is not a prefix of live {}",
            outputs.log_group_arn, live_group
        ),
    ));

    checks.push(FieldCheck::new(
        "log_group_name",
        !outputs.log_group_name.is_empty() && outputs.log_group_arn.ends_with(&outputs.log_group_name),
        format!(
            "log group name {} is not a suffix of {}",
            outputs.log_group_name, outputs.log_group_arn
        ),
    ));

    checks.push(FieldCheck::new(
        "role_arn",
        record.role_arn.as_deref() == Some(outputs.role_arn.as_str()),
        format!("role ARN: output {} vs live {}", outputs.role_arn, live(&record.role_arn)),
    ));

    checks.push(FieldCheck::new(
        "role_name",
        !outputs.role_name.is_empty() && outputs.role_arn.ends_with(&outputs.role_name),
        format!("role name {} is not a suffix of {}", outputs.role_name, outputs.role_arn),
    ));

    checks.push(FieldCheck::new(
        "home_region",
        outputs.home_region == expected.region,
        format!("home region: output {} vs test region {}", outputs.home_region, expected.region),
    ));

    checks.push(FieldCheck::new(
        "live_home_region",
        record.home_region.as_deref() == Some(outputs.home_region.as_str()),
        format!(
            "home region: output {} vs live {}",
            outputs.home_region,
            live(&record.home_region)
        ),
    ));

    checks.push(FieldCheck::new(
        "organization_trail",
        record.is_organization_trail == Some(expected.organization_trail),
        format!(
            "organization trail: expected {} vs live {:?}",
            expected.organization_trail, record.is_organization_trail
        ),
    ));

    checks
}

/// Record every failed comparison on the case without stopping it.
/// Returns the number of failures.
pub fn record(case: &CaseContext, checks: &[FieldCheck]) -> usize {
    checks
        .iter()
        .filter(|check| !case.check(check.passed, check.detail.clone()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn outputs() -> TrailOutputs {
        TrailOutputs {
            id: "eg-test-cloudtrail-abc123".to_string(),
            arn: "arn:aws:cloudtrail:us-east-2:111111111111:trail/eg-test-cloudtrail-abc123".to_string(),
            log_group_arn: "arn:aws:logs:us-east-2:111111111111:log-group:eg-test-cloudtrail-abc123".to_string(),
            log_group_name: "eg-test-cloudtrail-abc123".to_string(),
            role_arn: "arn:aws:iam::111111111111:role/eg-test-cloudtrail-abc123".to_string(),
            role_name: "eg-test-cloudtrail-abc123".to_string(),
            home_region: "us-east-2".to_string(),
        }
    }

    fn live_record() -> TrailRecord {
        let o = outputs();
        TrailRecord {
            name: Some(o.id),
            trail_arn: Some(o.arn),
            log_group_arn: Some(format!("{}:*", o.log_group_arn)),
            role_arn: Some(o.role_arn),
            home_region: Some("us-east-2".to_string()),
            is_organization_trail: Some(false),
        }
    }

    fn expectation() -> Expectation {
        Expectation {
            region: "us-east-2".to_string(),
            organization_trail: false,
        }
    }

    fn failed(checks: &[FieldCheck]) -> Vec<&'static str> {
        checks.iter().filter(|c| !c.passed).map(|c| c.field).collect()
    }

    #[test]
    fn test_matching_trail_passes_every_check() {
        let checks = compare(&outputs(), &live_record(), &expectation());
        assert_eq!(checks.len(), 8);
        assert!(failed(&checks).is_empty(), "{checks:?}");
    }

    #[test_case(|r: &mut TrailRecord| r.trail_arn = Some("arn:other".into()), "trail_arn" ; "different trail arn")]
    #[test_case(|r: &mut TrailRecord| r.log_group_arn = Some("arn:aws:logs:us-east-2:1:log-group:x:*".into()), "log_group_arn" ; "unrelated log group")]
    #[test_case(|r: &mut TrailRecord| r.role_arn = None, "role_arn" ; "missing role arn")]
    #[test_case(|r: &mut TrailRecord| r.home_region = Some("us-west-2".into()), "live_home_region" ; "live region differs")]
    #[test_case(|r: &mut TrailRecord| r.is_organization_trail = Some(true), "organization_trail" ; "unexpected org trail")]
    fn test_live_mismatch(mutate: fn(&mut TrailRecord), field: &str) {
        let mut record = live_record();
        mutate(&mut record);
        let checks = compare(&outputs(), &record, &expectation());
        assert_eq!(failed(&checks), vec![field]);
    }

    #[test]
    fn test_log_group_arn_must_be_strict_prefix() {
        let mut record = live_record();
        record.log_group_arn = Some(outputs().log_group_arn);
        let checks = compare(&outputs(), &record, &expectation());
        assert_eq!(failed(&checks), vec!["log_group_arn"]);
    }

    #[test]
    fn test_output_containment() {
        let mut o = outputs();
        o.log_group_name = "another-group".to_string();
        o.role_name = "another-role".to_string();
        let checks = compare(&o, &live_record(), &expectation());
        assert_eq!(failed(&checks), vec!["log_group_name", "role_name"]);
    }

    #[test]
    fn test_region_must_match_test_region() {
        let mut o = outputs();
        o.home_region = "us-west-2".to_string();
        let mut record = live_record();
        record.home_region = Some("us-west-2".to_string());
        let checks = compare(&o, &record, &expectation());
        assert_eq!(failed(&checks), vec!["home_region"]);
    }

    #[test]
    fn test_org_level_expectation() {
        let mut record = live_record();
        record.is_organization_trail = Some(true);
        let expected = Expectation {
            organization_trail: true,
            ..expectation()
        };
        assert!(failed(&compare(&outputs(), &record, &expected)).is_empty());
    }
}
