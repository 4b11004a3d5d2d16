use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::api::{JOB_MIN_PARALLELISM_ANNOTATION, PARENT_WORKLOAD_ANNOTATION, QUEUE_NAME_ANNOTATION, QUEUE_NAME_LABEL};
use crate::domain::flavor::Toleration;
use crate::domain::ids::{ClusterQueueName, FlavorName, ResourceName};
use crate::domain::quantity::Quantity;
use crate::domain::workload::{Admission, Condition, ConditionType, PodSet, PodSetAssignment, Workload};
use crate::error::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDto {
    pub metadata: ObjectMetaDto,
    pub spec: WorkloadSpecDto,
    #[serde(default)]
    pub status: WorkloadStatusDto,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetaDto {
    pub name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpecDto {
    #[serde(default)]
    pub queue_name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    pub pod_sets: Vec<PodSetDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PodSetDto {
    pub name: String,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_count: Option<u32>,
    #[serde(default)]
    pub template: PodTemplateDto,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateDto {
    #[serde(default)]
    pub containers: Vec<ContainerDto>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDto {
    #[serde(default)]
    pub resources: ResourceRequirementsDto,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsDto {
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatusDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission: Option<AdmissionDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reclaimable_pods: Vec<ReclaimablePodDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionDto {
    pub cluster_queue: String,
    pub pod_set_assignments: Vec<PodSetAssignmentDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PodSetAssignmentDto {
    pub name: String,
    pub count: u32,
    #[serde(default)]
    pub flavors: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_usage: BTreeMap<String, Quantity>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConditionDto {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    /// `"True"` or `"False"`, matching the persisted condition convention.
    pub status: String,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimablePodDto {
    pub name: String,
    pub count: u32,
}

impl WorkloadDto {
    /// Converts the persisted shape into the domain workload.
    ///
    /// The queue name is taken from `spec.queueName`, falling back to the
    /// queue-name label and then the deprecated annotation. Per-pod requests are
    /// the sum over the template's containers. The min-parallelism annotation
    /// enables partial admission for the first pod-set when `spec.podSets` does
    /// not already carry a `minCount`.
    pub fn into_domain(self) -> Result<Workload> {
        let mut workload = Workload::new(self.metadata.namespace, self.metadata.name);
        workload.uid = self.metadata.uid;
        workload.priority = self.spec.priority;
        workload.priority_class = self.spec.priority_class_name;
        workload.parent_workload = self.metadata.annotations.get(PARENT_WORKLOAD_ANNOTATION).cloned();
        if let Some(created) = self.metadata.creation_timestamp {
            workload.created_at = created;
        }

        workload.queue_name = if !self.spec.queue_name.is_empty() {
            self.spec.queue_name
        } else if let Some(label) = self.metadata.labels.get(QUEUE_NAME_LABEL) {
            label.clone()
        } else {
            self.metadata.annotations.get(QUEUE_NAME_ANNOTATION).cloned().unwrap_or_default()
        };

        let annotated_min = self
            .metadata
            .annotations
            .get(JOB_MIN_PARALLELISM_ANNOTATION)
            .map(|raw| raw.parse::<u32>().map_err(|_| Error::InvalidObject(format!("bad {} value: {:?}", JOB_MIN_PARALLELISM_ANNOTATION, raw))))
            .transpose()?;

        for (index, pod_set_dto) in self.spec.pod_sets.into_iter().enumerate() {
            let mut pod_set = PodSet::new(pod_set_dto.name, pod_set_dto.count);
            pod_set.min_count = pod_set_dto.min_count;
            if pod_set.min_count.is_none() && index == 0 {
                pod_set.min_count = annotated_min;
            }
            pod_set.node_selector = pod_set_dto.template.node_selector;
            pod_set.tolerations = pod_set_dto.template.tolerations;

            for container in pod_set_dto.template.containers {
                for (resource, amount) in container.resources.requests {
                    let entry = pod_set.requests.entry(ResourceName::new(resource)).or_insert(Quantity::ZERO);
                    *entry += amount;
                }
            }
            workload.pod_sets.push(pod_set);
        }

        workload.admission = self.status.admission.map(|admission| Admission {
            cluster_queue: ClusterQueueName::new(admission.cluster_queue),
            pod_set_assignments: admission
                .pod_set_assignments
                .into_iter()
                .map(|psa| PodSetAssignment {
                    name: psa.name,
                    count: psa.count,
                    flavors: psa.flavors.into_iter().map(|(r, f)| (ResourceName::new(r), FlavorName::new(f))).collect(),
                    resource_usage: psa.resource_usage.into_iter().map(|(r, q)| (ResourceName::new(r), q)).collect(),
                })
                .collect(),
        });

        for condition in self.status.conditions {
            workload.conditions.insert(
                condition.condition_type,
                Condition {
                    status: condition.status == "True",
                    reason: condition.reason,
                    message: condition.message,
                    last_transition_time: condition.last_transition_time,
                },
            );
        }

        for reclaimable in self.status.reclaimable_pods {
            workload.reclaimable.insert(reclaimable.name, reclaimable.count);
        }

        Ok(workload)
    }

    /// Renders a domain workload back into the persisted shape.
    pub fn from_domain(workload: &Workload) -> WorkloadDto {
        WorkloadDto {
            metadata: ObjectMetaDto {
                name: workload.name.clone(),
                namespace: workload.namespace.clone(),
                uid: workload.uid,
                creation_timestamp: Some(workload.created_at),
                labels: BTreeMap::new(),
                annotations: match &workload.parent_workload {
                    Some(parent) => {
                        let mut annotations = BTreeMap::new();
                        annotations.insert(PARENT_WORKLOAD_ANNOTATION.to_string(), parent.clone());
                        annotations
                    }
                    None => BTreeMap::new(),
                },
            },
            spec: WorkloadSpecDto {
                queue_name: workload.queue_name.clone(),
                priority: workload.priority,
                priority_class_name: workload.priority_class.clone(),
                pod_sets: workload
                    .pod_sets
                    .iter()
                    .map(|pod_set| PodSetDto {
                        name: pod_set.name.clone(),
                        count: pod_set.count,
                        min_count: pod_set.min_count,
                        template: PodTemplateDto {
                            containers: vec![ContainerDto {
                                resources: ResourceRequirementsDto {
                                    requests: pod_set.requests.iter().map(|(r, q)| (r.to_string(), *q)).collect(),
                                },
                            }],
                            node_selector: pod_set.node_selector.clone(),
                            tolerations: pod_set.tolerations.clone(),
                        },
                    })
                    .collect(),
            },
            status: WorkloadStatusDto {
                admission: workload.admission.as_ref().map(|admission| AdmissionDto {
                    cluster_queue: admission.cluster_queue.to_string(),
                    pod_set_assignments: admission
                        .pod_set_assignments
                        .iter()
                        .map(|psa| PodSetAssignmentDto {
                            name: psa.name.clone(),
                            count: psa.count,
                            flavors: psa.flavors.iter().map(|(r, f)| (r.to_string(), f.to_string())).collect(),
                            resource_usage: psa.resource_usage.iter().map(|(r, q)| (r.to_string(), *q)).collect(),
                        })
                        .collect(),
                }),
                conditions: workload
                    .conditions
                    .iter()
                    .map(|(condition_type, condition)| ConditionDto {
                        condition_type: *condition_type,
                        status: if condition.status { "True".to_string() } else { "False".to_string() },
                        reason: condition.reason.clone(),
                        message: condition.message.clone(),
                        last_transition_time: condition.last_transition_time,
                    })
                    .collect(),
                reclaimable_pods: workload.reclaimable.iter().map(|(name, count)| ReclaimablePodDto { name: name.clone(), count: *count }).collect(),
            },
        }
    }
}
