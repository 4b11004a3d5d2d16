use serde::{Deserialize, Serialize};

use crate::domain::cluster_queue::{
    ClusterQueueSpec, FlavorQuotas, PreemptionPolicy, QueueingStrategy, ResourceGroup, ResourceQuota,
};
use crate::domain::ids::{ClusterQueueName, CohortName, FlavorName, ResourceName};
use crate::domain::quantity::Quantity;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueueDto {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>,
    #[serde(default)]
    pub queueing_strategy: QueueingStrategy,
    #[serde(default)]
    pub resource_groups: Vec<ResourceGroupDto>,
    #[serde(default)]
    pub preemption: PreemptionPolicyDto,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupDto {
    pub covered_resources: Vec<String>,
    pub flavors: Vec<FlavorQuotasDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FlavorQuotasDto {
    pub name: String,
    pub resources: Vec<ResourceQuotaDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuotaDto {
    pub name: String,
    pub nominal_quota: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub borrowing_limit: Option<Quantity>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PreemptionPolicyDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within_cluster_queue: Option<crate::domain::cluster_queue::WithinClusterQueue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaim_within_cohort: Option<crate::domain::cluster_queue::ReclaimWithinCohort>,
}

impl ClusterQueueDto {
    pub fn into_domain(self) -> ClusterQueueSpec {
        let defaults = PreemptionPolicy::default();
        ClusterQueueSpec {
            name: ClusterQueueName::new(self.name),
            cohort: self.cohort.map(CohortName::new),
            queueing_strategy: self.queueing_strategy,
            preemption: PreemptionPolicy {
                within_cluster_queue: self.preemption.within_cluster_queue.unwrap_or(defaults.within_cluster_queue),
                reclaim_within_cohort: self.preemption.reclaim_within_cohort.unwrap_or(defaults.reclaim_within_cohort),
            },
            resource_groups: self
                .resource_groups
                .into_iter()
                .map(|group| ResourceGroup {
                    covered_resources: group.covered_resources.into_iter().map(ResourceName::new).collect(),
                    flavors: group
                        .flavors
                        .into_iter()
                        .map(|fq| FlavorQuotas {
                            flavor: FlavorName::new(fq.name),
                            quotas: fq
                                .resources
                                .into_iter()
                                .map(|quota| ResourceQuota {
                                    resource: ResourceName::new(quota.name),
                                    nominal: quota.nominal_quota,
                                    borrowing_limit: quota.borrowing_limit,
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
