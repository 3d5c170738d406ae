//! Scenario tests against a fake orchestrator and trail lookup

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use atmos_component_helper::{
    BucketCleaner, CallContext, ComponentRef, HarnessResult, Orchestrator, Outputs, PlanSummary, Suite, SuiteEnv,
    SuiteReport,
};
use cloudtrail_component_test::{register, TrailLookup, TrailRecord, TrailResult};

type Log = Arc<Mutex<Vec<String>>>;

const TRAIL: &str = "eg-test-cloudtrail-abc123";

#[derive(Default)]
struct FakeAtmos {
    log: Log,
    outputs: HashMap<String, Outputs>,
    plans: HashMap<String, PlanSummary>,
}

impl FakeAtmos {
    fn new(log: Log) -> Self {
        let mut fake = Self {
            log,
            ..Self::default()
        };
        fake.set_outputs("cloudtrail-bucket", json!({ "cloudtrail_bucket_id": "trail-logs-abc123" }));
        fake.set_outputs("cloudtrail/basic", trail_outputs());
        fake
    }

    fn set_outputs(&mut self, component: &str, values: Value) {
        let map: BTreeMap<String, Value> = serde_json::from_value(values).unwrap();
        self.outputs.insert(component.to_string(), Outputs::new(map));
    }

    fn with_plan(mut self, component: &str, summary: PlanSummary) -> Self {
        self.plans.insert(component.to_string(), summary);
        self
    }
}

#[async_trait]
impl Orchestrator for FakeAtmos {
    async fn deploy(&self, _ctx: &CallContext, target: &ComponentRef) -> HarnessResult<()> {
        self.log.lock().push(format!("deploy:{}", target.component));
        Ok(())
    }

    async fn destroy(&self, _ctx: &CallContext, target: &ComponentRef) -> HarnessResult<()> {
        self.log.lock().push(format!("destroy:{}", target.component));
        Ok(())
    }

    async fn outputs(&self, _ctx: &CallContext, target: &ComponentRef) -> HarnessResult<Outputs> {
        Ok(self.outputs.get(&target.component).cloned().unwrap_or_default())
    }

    async fn plan(&self, _ctx: &CallContext, target: &ComponentRef) -> HarnessResult<PlanSummary> {
        let enabled = target.vars.get("enabled").cloned().unwrap_or(Value::Null);
        self.log.lock().push(format!("plan:{}:enabled={}", target.component, enabled));
        Ok(self.plans.get(&target.component).copied().unwrap_or_default())
    }

    async fn vendor_pull(&self, _ctx: &CallContext) -> HarnessResult<()> {
        Ok(())
    }
}

struct FakeCleaner {
    log: Log,
}

#[async_trait]
impl BucketCleaner for FakeCleaner {
    async fn empty_bucket(&self, _ctx: &CallContext, bucket: &str) -> HarnessResult<usize> {
        self.log.lock().push(format!("empty:{bucket}"));
        Ok(0)
    }
}

struct FakeTrails {
    records: Vec<TrailRecord>,
    queried: Mutex<Vec<String>>,
}

impl FakeTrails {
    fn new(records: Vec<TrailRecord>) -> Arc<Self> {
        Arc::new(Self {
            records,
            queried: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TrailLookup for FakeTrails {
    async fn describe_trails(&self, _ctx: &CallContext, names: &[String]) -> TrailResult<Vec<TrailRecord>> {
        self.queried.lock().extend(names.iter().cloned());
        Ok(self.records.clone())
    }
}

fn trail_outputs() -> Value {
    json!({
        "cloudtrail_id": TRAIL,
        "cloudtrail_arn": format!("arn:aws:cloudtrail:us-east-2:111111111111:trail/{TRAIL}"),
        "cloudtrail_logs_log_group_arn": format!("arn:aws:logs:us-east-2:111111111111:log-group:{TRAIL}"),
        "cloudtrail_logs_log_group_name": TRAIL,
        "cloudtrail_logs_role_arn": format!("arn:aws:iam::111111111111:role/{TRAIL}"),
        "cloudtrail_logs_role_name": TRAIL,
        "cloudtrail_home_region": "us-east-2",
    })
}

fn live_trail() -> TrailRecord {
    TrailRecord {
        name: Some(TRAIL.to_string()),
        trail_arn: Some(format!("arn:aws:cloudtrail:us-east-2:111111111111:trail/{TRAIL}")),
        log_group_arn: Some(format!("arn:aws:logs:us-east-2:111111111111:log-group:{TRAIL}:*")),
        role_arn: Some(format!("arn:aws:iam::111111111111:role/{TRAIL}")),
        home_region: Some("us-east-2".to_string()),
        is_organization_trail: Some(false),
    }
}

fn suite(atmos: FakeAtmos, log: &Log, trails: Arc<FakeTrails>) -> Suite {
    let env = SuiteEnv::new(Arc::new(atmos), CallContext::default(), "us-east-2", "abc123")
        .with_bucket_cleaner(Arc::new(FakeCleaner { log: log.clone() }));
    let mut suite = Suite::new("default", env);
    register(&mut suite, trails, "default-test");
    suite
}

fn position(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{entry} not in {log:?}"))
}

fn assert_dependency_torn_down_last(log: &[String]) {
    let empty = position(log, "empty:trail-logs-abc123");
    let destroy = position(log, "destroy:cloudtrail-bucket");
    assert!(empty < destroy, "{log:?}");
    assert!(position(log, "destroy:cloudtrail/basic") < empty, "{log:?}");
}

async fn run(atmos: FakeAtmos, log: &Log, trails: Arc<FakeTrails>) -> SuiteReport {
    suite(atmos, log, trails).run().await
}

#[tokio::test]
async fn all_scenarios_pass_against_matching_trail() {
    let log = Log::default();
    let trails = FakeTrails::new(vec![live_trail()]);
    let report = run(FakeAtmos::new(log.clone()), &log, trails.clone()).await;

    assert!(report.success(), "{report:#?}");
    assert_eq!(report.total, 3);
    assert_eq!(report.passed, 2);
    assert_eq!(report.skipped, 1);
    assert!(report.case("org-level").unwrap().skipped);
    assert_eq!(*trails.queried.lock(), vec![TRAIL.to_string()]);

    let log = log.lock().clone();
    assert_eq!(log[0], "deploy:cloudtrail-bucket");
    assert!(position(&log, "deploy:cloudtrail/basic") < position(&log, "plan:cloudtrail/basic:enabled=null"));
    position(&log, "plan:cloudtrail/disabled:enabled=false");
    assert!(!log.iter().any(|e| e.contains("org-level")), "{log:?}");
    assert_dependency_torn_down_last(&log);
}

#[tokio::test]
async fn field_mismatches_are_collected_and_drift_still_runs() {
    let log = Log::default();
    let mut live = live_trail();
    live.role_arn = Some("arn:aws:iam::111111111111:role/other".to_string());
    live.is_organization_trail = Some(true);
    let report = run(FakeAtmos::new(log.clone()), &log, FakeTrails::new(vec![live])).await;

    let basic = report.case("basic").unwrap();
    assert!(!basic.success);
    assert!(basic.error.is_none(), "{basic:?}");
    assert_eq!(basic.failures.len(), 2, "{:?}", basic.failures);
    assert!(report.case("disabled").unwrap().success);

    let log = log.lock().clone();
    position(&log, "plan:cloudtrail/basic:enabled=null");
    assert_dependency_torn_down_last(&log);
}

#[tokio::test]
async fn missing_trail_is_fatal_to_the_case() {
    let log = Log::default();
    let report = run(FakeAtmos::new(log.clone()), &log, FakeTrails::new(Vec::new())).await;

    let basic = report.case("basic").unwrap();
    assert!(!basic.success);
    assert!(basic.error.as_deref().unwrap().contains("Trail not found"), "{basic:?}");

    let log = log.lock().clone();
    assert!(!log.contains(&"plan:cloudtrail/basic:enabled=null".to_string()), "{log:?}");
    assert_dependency_torn_down_last(&log);
}

#[tokio::test]
async fn ambiguous_trail_is_fatal_to_the_case() {
    let log = Log::default();
    let trails = FakeTrails::new(vec![live_trail(), live_trail()]);
    let report = run(FakeAtmos::new(log.clone()), &log, trails).await;

    let basic = report.case("basic").unwrap();
    assert!(basic.error.as_deref().unwrap().contains("matched 2 trails"), "{basic:?}");
    assert_dependency_torn_down_last(&log.lock());
}

#[tokio::test]
async fn drift_after_deploy_fails_basic() {
    let log = Log::default();
    let drifted = PlanSummary {
        exit_code: 2,
        to_add: 0,
        to_change: 1,
        to_destroy: 0,
    };
    let atmos = FakeAtmos::new(log.clone()).with_plan("cloudtrail/basic", drifted);
    let report = run(atmos, &log, FakeTrails::new(vec![live_trail()])).await;

    let basic = report.case("basic").unwrap();
    assert!(basic.failures.is_empty());
    assert!(basic.error.as_deref().unwrap().contains("Drift detected"), "{basic:?}");
    assert_dependency_torn_down_last(&log.lock());
}

#[tokio::test]
async fn disabled_component_must_plan_nothing() {
    let log = Log::default();
    let planned = PlanSummary {
        exit_code: 2,
        to_add: 4,
        to_change: 0,
        to_destroy: 0,
    };
    let atmos = FakeAtmos::new(log.clone()).with_plan("cloudtrail/disabled", planned);
    let report = run(atmos, &log, FakeTrails::new(vec![live_trail()])).await;

    assert!(report.case("basic").unwrap().success);
    let disabled = report.case("disabled").unwrap();
    assert!(!disabled.success);
    assert!(disabled.error.as_deref().unwrap().contains("while disabled"), "{disabled:?}");

    let log = log.lock().clone();
    assert!(!log.contains(&"deploy:cloudtrail/disabled".to_string()), "{log:?}");
}

#[tokio::test]
async fn scenario_filter_skips_the_rest() {
    let log = Log::default();
    let mut suite = suite(FakeAtmos::new(log.clone()), &log, FakeTrails::new(vec![live_trail()]));
    suite.filter("disabled");
    let report = suite.run().await;

    assert!(report.success());
    assert!(report.case("basic").unwrap().skipped);
    assert!(!report.case("disabled").unwrap().skipped);
    assert!(!log.lock().contains(&"deploy:cloudtrail/basic".to_string()));
}
