//! Live trail lookups

use async_trait::async_trait;
use aws_sdk_cloudtrail::config::Region;
use aws_sdk_cloudtrail::error::DisplayErrorContext;
use aws_sdk_cloudtrail::types::Trail;
use aws_sdk_cloudtrail::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use atmos_component_helper::{CallContext, HarnessError, Operation};

use crate::error::{TrailError, TrailResult};

/// The fields of a trail the component tests compare against
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrailRecord {
    pub name: Option<String>,
    pub trail_arn: Option<String>,
    pub log_group_arn: Option<String>,
    pub role_arn: Option<String>,
    pub home_region: Option<String>,
    pub is_organization_trail: Option<bool>,
}

impl From<&Trail> for TrailRecord {
    fn from(trail: &Trail) -> Self {
        Self {
            name: trail.name().map(str::to_string),
            trail_arn: trail.trail_arn().map(str::to_string),
            log_group_arn: trail.cloud_watch_logs_log_group_arn().map(str::to_string),
            role_arn: trail.cloud_watch_logs_role_arn().map(str::to_string),
            home_region: trail.home_region().map(str::to_string),
            is_organization_trail: trail.is_organization_trail(),
        }
    }
}

#[async_trait]
pub trait TrailLookup: Send + Sync {
    /// `DescribeTrails` for the given names
    async fn describe_trails(&self, ctx: &CallContext, names: &[String]) -> TrailResult<Vec<TrailRecord>>;
}

/// [`TrailLookup`] backed by the CloudTrail API
#[derive(Debug, Clone)]
pub struct CloudTrailClient {
    client: Client,
}

impl CloudTrailClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a read-only client from the ambient credential chain
    pub async fn from_env(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config))
    }
}

#[async_trait]
impl TrailLookup for CloudTrailClient {
    async fn describe_trails(&self, ctx: &CallContext, names: &[String]) -> TrailResult<Vec<TrailRecord>> {
        let label = format!("cloudtrail:DescribeTrails {}", names.join(","));
        debug!("{}", label);

        let output = ctx
            .bounded(Operation::Api, &label, async {
                self.client
                    .describe_trails()
                    .set_trail_name_list(Some(names.to_vec()))
                    .send()
                    .await
                    .map_err(|e| HarnessError::CloudApi(DisplayErrorContext(e).to_string()))
            })
            .await?;

        Ok(output.trail_list().iter().map(TrailRecord::from).collect())
    }
}

/// Resolve exactly one trail by name
pub async fn find_trail(lookup: &dyn TrailLookup, ctx: &CallContext, name: &str) -> TrailResult<TrailRecord> {
    let mut trails = lookup.describe_trails(ctx, &[name.to_string()]).await?;
    match trails.len() {
        0 => Err(TrailError::NotFound(name.to_string())),
        1 => {
            let trail = trails.remove(0);
            info!("Found trail {}", trail.trail_arn.as_deref().unwrap_or(name));
            Ok(trail)
        }
        count => Err(TrailError::Ambiguous {
            name: name.to_string(),
            count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<TrailRecord>);

    #[async_trait]
    impl TrailLookup for Fixed {
        async fn describe_trails(&self, _ctx: &CallContext, _names: &[String]) -> TrailResult<Vec<TrailRecord>> {
            Ok(self.0.clone())
        }
    }

    fn record(arn: &str) -> TrailRecord {
        TrailRecord {
            trail_arn: Some(arn.to_string()),
            ..TrailRecord::default()
        }
    }

    #[tokio::test]
    async fn test_find_trail_exactly_one() {
        let lookup = Fixed(vec![record("arn:aws:cloudtrail:us-east-2:1:trail/a")]);
        let trail = find_trail(&lookup, &CallContext::default(), "a").await.unwrap();
        assert_eq!(trail.trail_arn.as_deref(), Some("arn:aws:cloudtrail:us-east-2:1:trail/a"));
    }

    #[tokio::test]
    async fn test_find_trail_none() {
        let lookup = Fixed(Vec::new());
        let err = find_trail(&lookup, &CallContext::default(), "a").await.unwrap_err();
        assert!(matches!(err, TrailError::NotFound(name) if name == "a"));
    }

    #[tokio::test]
    async fn test_find_trail_ambiguous() {
        let lookup = Fixed(vec![record("x"), record("y")]);
        let err = find_trail(&lookup, &CallContext::default(), "a").await.unwrap_err();
        assert!(matches!(err, TrailError::Ambiguous { count: 2, .. }));
    }

    #[test]
    fn test_record_from_sdk_trail() {
        let trail = Trail::builder()
            .name("trail-abc123")
            .trail_arn("arn:aws:cloudtrail:us-east-2:1:trail/trail-abc123")
            .cloud_watch_logs_log_group_arn("arn:aws:logs:us-east-2:1:log-group:trail-abc123:*")
            .cloud_watch_logs_role_arn("arn:aws:iam::1:role/trail-abc123")
            .home_region("us-east-2")
            .is_organization_trail(false)
            .build();

        let record = TrailRecord::from(&trail);
        assert_eq!(record.name.as_deref(), Some("trail-abc123"));
        assert_eq!(record.home_region.as_deref(), Some("us-east-2"));
        assert_eq!(record.is_organization_trail, Some(false));
    }
}
