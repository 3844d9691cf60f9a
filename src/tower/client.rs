//! CloudTower API client implementation.
//!
//! REST operations are `POST {endpoint}/v2/api/<operation>` with a JSON
//! body; the `updateVm` mutation goes through `POST {endpoint}/api` as
//! GraphQL. Each call is a single request: retries and cancellation belong
//! to the callers.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ApiError, Result};

use super::api::ControlPlane;
use super::power::PowerOperation;
use super::types::{
    ElfImage, IdRef, StoragePolicyRecord, Task, TaskFilter, Vlan, Vm, VmCreateInput, VmDisk,
    VmNic, VmUpdateEffect, VmUpdateInput, WithTask,
};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// GraphQL document for the VM update mutation.
const UPDATE_VM_MUTATION: &str = r"
    mutation updateVm($data: VmUpdateInput!, $effect: UpdateVmEffect, $where: VmWhereUniqueInput!) {
        updateVm(data: $data, effect: $effect, where: $where) {
            id
        }
    }
";

/// CloudTower API client.
#[derive(Debug, Clone)]
pub struct TowerClient {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    endpoint: String,
    /// API token.
    token: String,
}

/// GraphQL request structure.
#[derive(Debug, Serialize)]
struct GraphQLRequest<'a> {
    query: &'a str,
    #[serde(rename = "operationName")]
    operation_name: &'a str,
    variables: Value,
}

/// GraphQL response structure.
#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    #[serde(default)]
    errors: Option<Vec<GraphQLError>>,
}

/// GraphQL error structure.
#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

impl TowerClient {
    /// Creates a new CloudTower API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: &str) -> Result<Self> {
        Self::with_timeout(endpoint, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(endpoint: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::network("connect", format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Sends one REST operation.
    async fn call<B, T>(&self, operation: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/v2/api/{operation}", self.endpoint);
        trace!("POST {url}");

        let response = self.post(operation, &url, body).await?;
        let parsed = response.json().await.map_err(|e| {
            ApiError::invalid_response(operation, format!("Failed to parse response: {e}"))
        })?;
        Ok(parsed)
    }

    /// Sends one GraphQL mutation.
    async fn mutate(&self, operation: &str, query: &str, variables: Value) -> Result<()> {
        let url = format!("{}/api", self.endpoint);
        let request = GraphQLRequest {
            query,
            operation_name: operation,
            variables,
        };
        trace!("GraphQL {operation}");

        let response = self.post(operation, &url, &request).await?;
        let gql: GraphQLResponse = response.json().await.map_err(|e| {
            ApiError::invalid_response(operation, format!("Failed to parse response: {e}"))
        })?;

        if let Some(errors) = gql.errors.filter(|e| !e.is_empty()) {
            let message = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ApiError::request(operation, 400, message).into());
        }
        Ok(())
    }

    async fn post<B>(&self, operation: &str, url: &str, body: &B) -> Result<reqwest::Response>
    where
        B: Serialize + Sync + ?Sized,
    {
        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::network(operation, format!("Request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ApiError::AuthenticationFailed {
                message: format!("{operation} rejected the API token"),
            }
            .into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::request(operation, status.as_u16(), body).into());
        }
        Ok(response)
    }

    async fn first<T: DeserializeOwned>(&self, operation: &str, id: &str) -> Result<Option<T>> {
        let items: Vec<T> = self
            .call(operation, &json!({ "where": { "id": id }, "first": 1 }))
            .await?;
        Ok(items.into_iter().next())
    }
}

fn task_query(filter: &TaskFilter) -> Value {
    match filter {
        TaskFilter::IdIn(ids) => json!({ "where": { "id_in": ids } }),
        TaskFilter::LatestForResource {
            resource_id,
            mutation,
        } => json!({
            "where": { "resource_id": resource_id, "resource_mutation": mutation },
            "orderBy": "local_created_at_DESC",
            "first": 1,
        }),
    }
}

fn power_body(vm_id: &str, operation: &PowerOperation) -> Value {
    match operation {
        PowerOperation::Start {
            host_id: Some(host_id),
        } => json!({ "where": { "id": vm_id }, "data": { "host_id": host_id } }),
        _ => json!({ "where": { "id": vm_id } }),
    }
}

#[async_trait]
impl ControlPlane for TowerClient {
    async fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.call("get-tasks", &task_query(filter)).await
    }

    async fn get_vm(&self, vm_id: &str) -> Result<Option<Vm>> {
        self.first("get-vms", vm_id).await
    }

    async fn list_vm_disks(&self, vm_id: &str) -> Result<Vec<VmDisk>> {
        self.call(
            "get-vm-disks",
            &json!({ "where": { "vm": { "id": vm_id } }, "orderBy": "boot_ASC" }),
        )
        .await
    }

    async fn list_vm_nics(&self, vm_id: &str) -> Result<Vec<VmNic>> {
        self.call(
            "get-vm-nics",
            &json!({ "where": { "vm": { "id": vm_id } }, "orderBy": "order_ASC" }),
        )
        .await
    }

    async fn list_storage_policies(&self) -> Result<Vec<StoragePolicyRecord>> {
        self.call("get-elf-storage-policies", &json!({})).await
    }

    async fn get_vlan(&self, vlan_id: &str) -> Result<Option<Vlan>> {
        self.first("get-vlans", vlan_id).await
    }

    async fn get_iso(&self, iso_id: &str) -> Result<Option<ElfImage>> {
        self.first("get-elf-images", iso_id).await
    }

    async fn power(&self, vm_id: &str, operation: &PowerOperation) -> Result<Vec<WithTask<Vm>>> {
        debug!("{} {vm_id}", operation.endpoint());
        self.call(operation.endpoint(), &power_body(vm_id, operation))
            .await
    }

    async fn create_vm(&self, input: &VmCreateInput) -> Result<Vec<WithTask<Vm>>> {
        debug!("create-vm {} in cluster {}", input.name, input.cluster_id);
        self.call("create-vm", std::slice::from_ref(input)).await
    }

    async fn delete_vm(&self, vm_id: &str) -> Result<Vec<WithTask<IdRef>>> {
        debug!("delete-vm {vm_id}");
        self.call("delete-vm", &json!({ "where": { "id": vm_id } }))
            .await
    }

    async fn update_vm(
        &self,
        vm_id: &str,
        data: &VmUpdateInput,
        effect: &VmUpdateEffect,
    ) -> Result<()> {
        debug!("updateVm {vm_id}");
        let variables = json!({
            "data": data,
            "effect": effect,
            "where": { "id": vm_id },
        });
        self.mutate("updateVm", UPDATE_VM_MUTATION, variables).await
    }
}
