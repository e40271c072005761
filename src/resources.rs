use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ResourceList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct PodStatus {
    pub phase: Option<String>,
}

impl Pod {
    /// Running and Succeeded both count towards readiness.
    pub fn is_ready(&self) -> bool {
        matches!(self.status.phase.as_deref(), Some("Running") | Some("Succeeded"))
    }
}

#[derive(Debug, Deserialize)]
pub struct Endpoints {
    #[serde(default)]
    pub subsets: Option<Vec<serde_json::Value>>,
}

impl Endpoints {
    pub fn has_addresses(&self) -> bool {
        self.subsets.as_ref().is_some_and(|s| !s.is_empty())
    }
}

/// Any object with `status.loadBalancer.ingress[]`: Ingress or Service.
#[derive(Debug, Default, Deserialize)]
pub struct LoadBalanced {
    #[serde(default)]
    pub status: LoadBalancedStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoadBalancedStatus {
    #[serde(default, rename = "loadBalancer")]
    pub load_balancer: LoadBalancerStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoadBalancerStatus {
    #[serde(default)]
    pub ingress: Vec<LoadBalancerIngress>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoadBalancerIngress {
    pub ip: Option<String>,
    pub hostname: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

impl LoadBalanced {
    pub fn ip(&self) -> Option<String> {
        non_empty(self.status.load_balancer.ingress.first().and_then(|i| i.ip.as_ref()))
    }

    pub fn hostname(&self) -> Option<String> {
        non_empty(
            self.status
                .load_balancer
                .ingress
                .first()
                .and_then(|i| i.hostname.as_ref()),
        )
    }

    /// IP first, then hostname.
    pub fn address(&self) -> Option<String> {
        self.ip().or_else(|| self.hostname())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_listing_tolerates_missing_status() {
        let list: ResourceList<Pod> = serde_json::from_str(
            r#"{"items":[{"metadata":{"name":"a"},"status":{"phase":"Running"}},{"metadata":{"name":"b"}}]}"#,
        )
        .unwrap();
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[1].metadata.name, "b");
        assert_eq!(list.items[1].metadata.namespace, None);
        assert!(list.items[0].is_ready());
        assert!(!list.items[1].is_ready());
    }

    #[test]
    fn empty_listing_has_no_items() {
        let list: ResourceList<Node> =
            serde_json::from_str(r#"{"apiVersion":"v1","kind":"List"}"#).unwrap();
        assert!(list.items.is_empty());
    }

    #[test]
    fn endpoints_without_subsets_have_no_addresses() {
        let none: Endpoints = serde_json::from_str(r#"{"metadata":{}}"#).unwrap();
        let null: Endpoints = serde_json::from_str(r#"{"subsets":null}"#).unwrap();
        let empty: Endpoints = serde_json::from_str(r#"{"subsets":[]}"#).unwrap();
        let ready: Endpoints =
            serde_json::from_str(r#"{"subsets":[{"addresses":[{"ip":"10.0.0.4"}]}]}"#).unwrap();
        assert!(!none.has_addresses());
        assert!(!null.has_addresses());
        assert!(!empty.has_addresses());
        assert!(ready.has_addresses());
    }

    #[test]
    fn blank_ip_falls_through_to_hostname() {
        let lb: LoadBalanced = serde_json::from_str(
            r#"{"status":{"loadBalancer":{"ingress":[{"ip":"","hostname":"lb.example.com"}]}}}"#,
        )
        .unwrap();
        assert_eq!(lb.ip(), None);
        assert_eq!(lb.address().as_deref(), Some("lb.example.com"));
    }

    #[test]
    fn pending_load_balancer_has_no_address() {
        let lb: LoadBalanced = serde_json::from_str(r#"{"status":{"loadBalancer":{}}}"#).unwrap();
        assert_eq!(lb.address(), None);
    }
}
