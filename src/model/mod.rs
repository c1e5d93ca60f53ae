// Wire records exchanged with the coordinator and the site instances.
//
// Field names are case-sensitive and follow the coordinator exactly,
// including compound keys such as `CSCI-ID`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::preference::Pref;

/// Decodes `null` as the type's default (the coordinator emits `null` for empty lists).
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// One network-addressable deployment of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    /// Absolute URL or site-relative path (leading `/`).
    #[serde(rename = "addr")]
    pub address: String,
}

impl InstanceRef {
    pub fn new(instance_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            address: address.into(),
        }
    }
}

/// A site-level group of instances eligible to serve a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "SiteName", default)]
    pub site_name: String,
    #[serde(rename = "ServiceID", default, skip_serializing_if = "String::is_empty")]
    pub service_id: String,
    #[serde(rename = "Gas", default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<i64>,
    #[serde(rename = "Cost", default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<i64>,
    #[serde(rename = "CSCI-ID", default, skip_serializing_if = "Option::is_none")]
    pub csci_id: Option<String>,
    #[serde(rename = "instances", default, deserialize_with = "null_as_default")]
    pub instances: Vec<InstanceRef>,
}

impl Candidate {
    pub fn new(site_name: impl Into<String>, instances: Vec<InstanceRef>) -> Self {
        Self {
            site_name: site_name.into(),
            service_id: String::new(),
            gas: None,
            cost: None,
            csci_id: None,
            instances,
        }
    }
}

/// Round-trip time observed for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(rename = "SiteName")]
    pub site_name: String,
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    #[serde(rename = "addr")]
    pub address: String,
    /// Absent when the probe failed.
    #[serde(rename = "delayMs", default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Why the probe failed; local only.
    #[serde(skip)]
    pub error: Option<String>,
}

impl Measurement {
    pub fn is_measured(&self) -> bool {
        self.delay_ms.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidatesRequest<'a> {
    #[serde(rename = "ServiceID")]
    pub service_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidatesResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocateRequest {
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub measurements: Vec<Measurement>,
    #[serde(rename = "CostPref")]
    pub cost_pref: Pref,
    #[serde(rename = "DelayPref")]
    pub delay_pref: Pref,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocateResponse {
    #[serde(rename = "allocationId", default, deserialize_with = "null_as_default")]
    pub allocation_id: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: Option<String>,
    #[serde(rename = "instanceId", default, deserialize_with = "null_as_default")]
    pub instance_id: String,
    #[serde(rename = "addr", default, deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(rename = "CSCI-ID", default)]
    pub csci_id: Option<String>,
    #[serde(rename = "Cost", default)]
    pub cost: Option<i64>,
    #[serde(rename = "GasRemaining", default)]
    pub gas_remaining: Option<i64>,
}

/// Coordinator-issued reservation binding the session to one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub allocation_id: String,
    pub chosen_address: String,
    pub chosen_instance_id: String,
    pub service_id: String,
    pub csci_id: Option<String>,
    pub cost: Option<i64>,
    pub gas_remaining: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseRequest<'a> {
    #[serde(rename = "allocationId")]
    pub allocation_id: &'a str,
}

/// Announcement sent when the user picks a service.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionNotice<'a> {
    #[serde(rename = "ServiceID")]
    pub service_id: &'a str,
    #[serde(rename = "Gas")]
    pub gas: u32,
    #[serde(rename = "CostPref")]
    pub cost_pref: Pref,
    #[serde(rename = "DelayPref")]
    pub delay_pref: Pref,
    #[serde(rename = "SelectedAt")]
    pub selected_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(rename = "ServiceName", default)]
    pub service_name: String,
    #[serde(rename = "Input", default)]
    pub input: String,
    #[serde(rename = "ServiceDescription", default)]
    pub description: String,
    #[serde(rename = "ServiceRuningCode", default)]
    pub running_code: String,
    #[serde(rename = "ComputingRequirement", default)]
    pub computing_requirement: String,
    #[serde(rename = "StorageRequirement", default)]
    pub storage_requirement: String,
    #[serde(rename = "ComputingTime", default)]
    pub computing_time: String,
    #[serde(rename = "SoftwareDependency", default)]
    pub software_dependency: String,
    #[serde(rename = "DataSample", default)]
    pub data_sample: String,
    #[serde(rename = "Result", default)]
    pub result: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<ServiceDescriptor>,
}

/// One row of the coordinator's CPS overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpsViewRow {
    #[serde(rename = "CS-ID", default)]
    pub cs_id: String,
    #[serde(rename = "CSCI-ID", default)]
    pub csci_id: String,
    #[serde(rename = "Gas", default)]
    pub gas: i64,
    #[serde(rename = "Cost", default)]
    pub cost: i64,
    #[serde(rename = "Computingtime", default)]
    pub computing_time: String,
    #[serde(rename = "Networkdelay", default)]
    pub network_delay: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CpsViewResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cps: Vec<CpsViewRow>,
}
