use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{Address, PgpId, Status};

/// Source ID of nodes owned by this instance.
pub const LOCAL_SOURCE_ID: i64 = 0;
/// Hostname under which local nodes are grouped in dumps.
pub const LOCAL_SOURCE: &str = "local";

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// A computer, radio, or any other participant in the mesh network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    /// Local ID of the map this node came from; 0 means local.
    #[serde(skip)]
    pub source_id: i64,

    #[serde(default)]
    pub status: Status,

    pub latitude: f64,
    pub longitude: f64,

    pub addr: Address,

    /// Unix time of the last refresh from the origin map. Zero for
    /// local nodes.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retrieve_time: i64,

    #[serde(default)]
    pub owner_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner_email: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub contact: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,

    #[serde(rename = "PGP", default, skip_serializing_if = "PgpId::is_empty")]
    pub pgp: PgpId,
}

impl Node {
    pub fn new(addr: Address, latitude: f64, longitude: f64) -> Self {
        Self {
            source_id: LOCAL_SOURCE_ID,
            status: Status::empty(),
            latitude,
            longitude,
            addr,
            retrieve_time: 0,
            owner_name: String::new(),
            owner_email: String::new(),
            contact: String::new(),
            details: String::new(),
            pgp: PgpId::default(),
        }
    }

    pub fn is_cached(&self) -> bool {
        self.source_id != LOCAL_SOURCE_ID
    }

    /// Copy of the node without sensitive fields, for public reads.
    pub fn public(&self) -> Self {
        Self {
            owner_email: String::new(),
            ..self.clone()
        }
    }

    /// GeoJSON Feature for this node.
    pub fn feature(&self) -> Value {
        let mut properties = Map::new();
        properties.insert("OwnerName".into(), json!(self.owner_name));
        properties.insert("Status".into(), json!(self.status.bits()));
        if !self.contact.is_empty() {
            properties.insert("Contact".into(), json!(self.contact));
        }
        if !self.pgp.is_empty() {
            properties.insert("PGP".into(), json!(self.pgp.encode()));
        }
        if !self.details.is_empty() {
            properties.insert("Details".into(), json!(self.details));
        }
        if self.source_id != LOCAL_SOURCE_ID {
            properties.insert("SourceID".into(), json!(self.source_id));
        }

        json!({
            "type": "Feature",
            "geometry": {
                "type": "Point",
                "coordinates": [self.longitude, self.latitude],
            },
            "properties": properties,
            "id": self.addr.to_string(),
        })
    }
}

/// GeoJSON FeatureCollection of the given nodes, in order.
pub fn feature_collection(nodes: &[Node]) -> Value {
    let features: Vec<Value> = nodes.iter().map(Node::feature).collect();
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        let mut node = Node::new(Address::parse("fc00::1").unwrap(), 80.5, -80.25);
        node.owner_name = "alice".to_string();
        node.owner_email = "alice@example.org".to_string();
        node.status = Status::ACTIVE | Status::WIRELESS;
        node
    }

    #[test]
    fn test_wire_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["Addr"], "fc00::1");
        assert_eq!(value["OwnerName"], "alice");
        assert_eq!(value["Status"], 513);
        assert!(value.get("SourceID").is_none());
        assert!(value.get("RetrieveTime").is_none());
        assert!(value.get("PGP").is_none());
        assert!(value.get("Contact").is_none());
    }

    #[test]
    fn test_public_strips_email() {
        let value = serde_json::to_value(sample().public()).unwrap();
        assert!(value.get("OwnerEmail").is_none());
    }

    #[test]
    fn test_decode_peer_form() {
        let node: Node = serde_json::from_str(
            r#"{"Addr":"fc00::2","OwnerName":"bob","Latitude":1.0,"Longitude":2.0,"Status":1}"#,
        )
        .unwrap();
        assert_eq!(node.source_id, LOCAL_SOURCE_ID);
        assert!(node.status.is_active());
        assert!(node.owner_email.is_empty());
    }

    #[test]
    fn test_feature() {
        let mut node = sample();
        node.source_id = 3;
        let feature = node.feature();
        assert_eq!(feature["type"], "Feature");
        assert_eq!(feature["geometry"]["coordinates"][0], -80.25);
        assert_eq!(feature["geometry"]["coordinates"][1], 80.5);
        assert_eq!(feature["properties"]["SourceID"], 3);
        assert_eq!(feature["id"], "fc00::1");
        assert!(feature["properties"].get("OwnerEmail").is_none());

        let collection = feature_collection(&[node]);
        assert_eq!(collection["features"].as_array().unwrap().len(), 1);
    }
}
