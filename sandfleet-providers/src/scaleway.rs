use crate::inventory::{
    InstanceInfo, InstanceState, LaunchRequest, Tag, VolumeInfo, VolumeState,
};
use crate::CloudProvider;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::Duration;

const API_BASE: &str = "https://api.scaleway.com";
const PAGE_SIZE: usize = 50;

/// Scaleway Instances + Block Storage, bound to a single zone.
///
/// Scaleway has no device paths or EC2-style string tags: tags are stored as
/// `KEY=value` strings and the `Name` tag maps to the server name.
pub struct ScalewayProvider {
    client: Client,
    api_base: String,
    zone: String,
    project_id: String,
    secret_key: String,
}

impl ScalewayProvider {
    pub fn new(zone: String, project_id: String, secret_key: String) -> Result<Self> {
        // Default reqwest client has no overall timeout. If Scaleway stalls, a restore can hang forever.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            api_base: API_BASE.to_string(),
            zone: zone.trim().to_string(),
            project_id: project_id.trim().to_string(),
            secret_key: secret_key.trim().to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-Auth-Token",
            reqwest::header::HeaderValue::from_str(&self.secret_key)?,
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        Ok(headers)
    }

    fn instance_url(&self, path: &str) -> String {
        format!("{}/instance/v1/zones/{}/{}", self.api_base, self.zone, path)
    }

    fn block_url(&self, path: &str) -> String {
        format!("{}/block/v1alpha1/zones/{}/{}", self.api_base, self.zone, path)
    }

    async fn call(&self, method: Method, url: &str, body: Option<Value>) -> Result<Value> {
        tracing::debug!("🔵 [Scaleway API] {} {}", method, url);
        let mut req = self
            .client
            .request(method.clone(), url)
            .headers(self.headers()?);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            tracing::warn!(
                "❌ [Scaleway API] {} {} failed: status={}, response={}",
                method,
                url,
                status.as_u16(),
                text
            );
            return Err(anyhow::anyhow!(
                "Scaleway {} {} failed: status={} body={}",
                method,
                url,
                status.as_u16(),
                text
            ));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn server_action(&self, server_id: &str, action: &str) -> Result<()> {
        let url = self.instance_url(&format!("servers/{}/action", server_id));
        self.call(Method::POST, &url, Some(json!({ "action": action })))
            .await?;
        Ok(())
    }

    async fn finish_launch(&self, server_id: &str, subnet_id: &str) -> Result<()> {
        if !subnet_id.trim().is_empty() {
            let url = self.instance_url(&format!("servers/{}/private_nics", server_id));
            self.call(
                Method::POST,
                &url,
                Some(json!({ "private_network_id": subnet_id })),
            )
            .await?;
        }
        // Scaleway creates servers powered off; elastic machines are expected to boot right away.
        self.server_action(server_id, "poweron").await
    }

    async fn discard_server(&self, server_id: &str) {
        let url = self.instance_url(&format!("servers/{}", server_id));
        match self.call(Method::DELETE, &url, None).await {
            Ok(_) => tracing::warn!("🗑️ [Scaleway API] Deleted half-launched server {}", server_id),
            Err(e) => tracing::error!(
                "❌ [Scaleway API] Could not delete half-launched server {}: {:#}",
                server_id,
                e
            ),
        }
    }

    async fn get_server(&self, server_id: &str) -> Result<Value> {
        let url = self.instance_url(&format!("servers/{}", server_id));
        let resp = self.call(Method::GET, &url, None).await?;
        Ok(resp["server"].clone())
    }

    fn parse_server(&self, server: &Value) -> Result<InstanceInfo> {
        let instance_id = server["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("No server id in Scaleway response"))?
            .to_string();
        let mut tags = Vec::new();
        if let Some(name) = server["name"].as_str() {
            tags.push(Tag::new("Name", name));
        }
        if let Some(raw_tags) = server["tags"].as_array() {
            tags.extend(raw_tags.iter().filter_map(|t| t.as_str()).map(Tag::from_flat));
        }
        let private_ip = server["private_ip"]
            .as_str()
            .map(|s| s.to_string())
            .or_else(|| {
                server["private_ips"]
                    .as_array()
                    .and_then(|ips| ips.first())
                    .and_then(|ip| ip["address"].as_str())
                    .map(|s| s.to_string())
            });
        Ok(InstanceInfo {
            instance_id,
            state: map_server_state(server["state"].as_str().unwrap_or("")),
            private_ip,
            availability_zone: server["zone"]
                .as_str()
                .unwrap_or(self.zone.as_str())
                .to_string(),
            tags,
        })
    }
}

/// Scaleway server states expressed in EC2 vocabulary.
fn map_server_state(raw: &str) -> InstanceState {
    match raw.trim().to_ascii_lowercase().as_str() {
        "running" => InstanceState::Running,
        "stopped" | "stopped in place" => InstanceState::Stopped,
        "starting" => InstanceState::Pending,
        "stopping" => InstanceState::Stopping,
        other => InstanceState::Other(other.to_string()),
    }
}

fn parse_block_volume(volume: &Value, default_zone: &str) -> Result<VolumeInfo> {
    let volume_id = volume["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("No volume id in Scaleway response"))?
        .to_string();
    let attached_to = volume["references"].as_array().and_then(|refs| {
        refs.iter()
            .find(|r| r["product_resource_type"].as_str() == Some("instance_server"))
            .and_then(|r| r["product_resource_id"].as_str())
            .map(|s| s.to_string())
    });
    Ok(VolumeInfo {
        volume_id,
        state: VolumeState::parse(volume["status"].as_str().unwrap_or("")),
        volume_type: volume["type"].as_str().unwrap_or("sbs_5k").to_string(),
        availability_zone: volume["zone"].as_str().unwrap_or(default_zone).to_string(),
        snapshot_id: volume["parent_snapshot_id"].as_str().map(|s| s.to_string()),
        attached_to,
    })
}

/// Block Storage takes an IOPS tier rather than a type name.
fn perf_iops_for(volume_type: &str) -> u32 {
    match volume_type.trim().to_ascii_lowercase().as_str() {
        "sbs_15k" => 15000,
        _ => 5000,
    }
}

#[async_trait]
impl CloudProvider for ScalewayProvider {
    async fn list_instances(&self, states: &[InstanceState]) -> Result<Vec<InstanceInfo>> {
        let mut out = Vec::new();
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}?project={}&per_page={}&page={}",
                self.instance_url("servers"),
                self.project_id,
                PAGE_SIZE,
                page
            );
            let resp = self.call(Method::GET, &url, None).await?;
            let servers = resp["servers"].as_array().cloned().unwrap_or_default();
            for server in &servers {
                let info = self.parse_server(server)?;
                if states.contains(&info.state) {
                    out.push(info);
                }
            }
            if servers.len() < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        tracing::debug!("✅ [Scaleway API] Listed {} matching server(s)", out.len());
        Ok(out)
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceInfo> {
        let server = self.get_server(instance_id).await?;
        self.parse_server(&server)
    }

    async fn start_instance(&self, instance_id: &str) -> Result<()> {
        self.server_action(instance_id, "poweron").await
    }

    async fn stop_instance(&self, instance_id: &str, _force: bool) -> Result<()> {
        // Scaleway rejects poweroff on a stopped server
        let current = self.describe_instance(instance_id).await?;
        if current.state == InstanceState::Stopped {
            tracing::info!("ℹ️ [Scaleway API] Server {} already stopped", instance_id);
            return Ok(());
        }
        self.server_action(instance_id, "poweroff").await
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        // `terminate` is only accepted on running servers; stopped ones are deleted directly.
        let current = self.describe_instance(instance_id).await?;
        if current.state == InstanceState::Stopped {
            let url = self.instance_url(&format!("servers/{}", instance_id));
            self.call(Method::DELETE, &url, None).await?;
            return Ok(());
        }
        self.server_action(instance_id, "terminate").await
    }

    async fn create_instance(&self, request: &LaunchRequest) -> Result<InstanceInfo> {
        let name = request
            .name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("sandfleet-{}", uuid::Uuid::new_v4()));
        let tags: Vec<String> = request
            .tags
            .iter()
            .filter(|t| t.key != "Name")
            .map(|t| t.to_flat())
            .collect();

        let mut body = json!({
            "name": name,
            "commercial_type": request.instance_type,
            "project": self.project_id,
            "image": request.image_id,
            "tags": tags,
            "dynamic_ip_required": false,
            "boot_type": "local",
        });
        if let Some(sg) = request.security_groups.first() {
            body["security_group"] = json!(sg);
        }

        let resp = self
            .call(Method::POST, &self.instance_url("servers"), Some(body))
            .await?;
        let info = self.parse_server(&resp["server"])?;
        tracing::info!(
            "✅ [Scaleway API] Server created: id={}, zone={}",
            info.instance_id,
            self.zone
        );

        // The server exists from here on; a failed follow-up must not leak it.
        if let Err(e) = self.finish_launch(&info.instance_id, &request.subnet_id).await {
            self.discard_server(&info.instance_id).await;
            return Err(e);
        }
        Ok(InstanceInfo {
            state: InstanceState::Pending,
            ..info
        })
    }

    async fn list_attached_volumes(&self, instance_id: &str) -> Result<Vec<VolumeInfo>> {
        let server = self.get_server(instance_id).await?;
        let mut out = Vec::new();
        if let Some(volumes) = server["volumes"].as_object() {
            for vol in volumes.values() {
                let Some(volume_id) = vol["id"].as_str() else {
                    continue;
                };
                if vol["volume_type"].as_str() == Some("sbs_volume") {
                    out.push(self.describe_volume(volume_id).await?);
                } else {
                    // Local volumes are not visible to the Block API
                    out.push(VolumeInfo {
                        volume_id: volume_id.to_string(),
                        state: VolumeState::InUse,
                        volume_type: vol["volume_type"].as_str().unwrap_or("l_ssd").to_string(),
                        availability_zone: self.zone.clone(),
                        snapshot_id: None,
                        attached_to: Some(instance_id.to_string()),
                    });
                }
            }
        }
        Ok(out)
    }

    async fn describe_volume(&self, volume_id: &str) -> Result<VolumeInfo> {
        let url = self.block_url(&format!("volumes/{}", volume_id));
        let resp = self.call(Method::GET, &url, None).await?;
        parse_block_volume(&resp, &self.zone)
    }

    async fn detach_volume(&self, instance_id: &str, volume_id: &str, _force: bool) -> Result<()> {
        let url = self.instance_url(&format!("servers/{}/detach-volume", instance_id));
        self.call(Method::POST, &url, Some(json!({ "volume_id": volume_id })))
            .await?;
        Ok(())
    }

    async fn attach_volume(&self, instance_id: &str, volume_id: &str, device: &str) -> Result<()> {
        tracing::debug!(
            "🔵 [Scaleway API] Attaching {} to {} as boot volume (requested device {})",
            volume_id,
            instance_id,
            device
        );
        let url = self.instance_url(&format!("servers/{}/attach-volume", instance_id));
        self.call(
            Method::POST,
            &url,
            Some(json!({
                "volume_id": volume_id,
                "volume_type": "sbs_volume",
                "boot": true,
            })),
        )
        .await?;
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let url = self.block_url(&format!("volumes/{}", volume_id));
        self.call(Method::DELETE, &url, None).await?;
        Ok(())
    }

    async fn create_volume_from_snapshot(
        &self,
        snapshot_id: &str,
        availability_zone: &str,
        volume_type: &str,
    ) -> Result<VolumeInfo> {
        let body = json!({
            "name": format!("sandfleet-restore-{}", uuid::Uuid::new_v4()),
            "project_id": self.project_id,
            "from_snapshot": { "snapshot_id": snapshot_id },
            "perf_iops": perf_iops_for(volume_type),
            "tags": ["sandfleet"],
        });
        let url = format!(
            "{}/block/v1alpha1/zones/{}/volumes",
            self.api_base, availability_zone
        );
        let resp = self.call(Method::POST, &url, Some(body)).await?;
        parse_block_volume(&resp, availability_zone)
    }
}
