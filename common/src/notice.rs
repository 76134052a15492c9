use serde::{Deserialize, Serialize};
use url::Url;

use crate::task::TaskId;

pub type ReceiptHandle = String;

/// Mensaje que viaja por la cola: identifica la tarea y dónde quedó su blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchNotice {
    #[serde(rename = "taskId")]
    pub task_id: TaskId,
    #[serde(rename = "s3Uri")]
    pub s3_uri: String,
}

impl DispatchNotice {
    /// Clave del blob dentro del bucket, ej: s3://images/<taskId> -> <taskId>
    pub fn blob_key(&self) -> Result<String, InvalidBlobUri> {
        parse_blob_uri(&self.s3_uri).map(|(_, key)| key)
    }
}

/// Una recepción concreta de un notice por parte de un consumidor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub receipt: ReceiptHandle,
    pub notice: DispatchNotice,
    /// 1 en la primera entrega, se incrementa con cada reentrega
    pub receive_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("uri de blob inválida: {0}")]
pub struct InvalidBlobUri(pub String);

pub fn blob_uri(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

/// Devuelve (bucket, key).
pub fn parse_blob_uri(uri: &str) -> Result<(String, String), InvalidBlobUri> {
    let parsed = Url::parse(uri).map_err(|_| InvalidBlobUri(uri.to_string()))?;
    if parsed.scheme() != "s3" {
        return Err(InvalidBlobUri(uri.to_string()));
    }

    let bucket = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| InvalidBlobUri(uri.to_string()))?
        .to_string();
    let key = parsed.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(InvalidBlobUri(uri.to_string()));
    }

    Ok((bucket, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notice_usa_formato_de_cable() {
        let notice = DispatchNotice {
            task_id: "abc".to_string(),
            s3_uri: blob_uri("images", "abc"),
        };

        let v = serde_json::to_value(&notice).unwrap();
        assert_eq!(v, json!({"taskId": "abc", "s3Uri": "s3://images/abc"}));
    }

    #[test]
    fn parse_blob_uri_separa_bucket_y_key() {
        let (bucket, key) = parse_blob_uri("s3://images/1234-abcd").unwrap();
        assert_eq!(bucket, "images");
        assert_eq!(key, "1234-abcd");
    }

    #[test]
    fn parse_blob_uri_rechaza_uris_raras() {
        assert!(parse_blob_uri("not a uri").is_err());
        assert!(parse_blob_uri("http://images/abc").is_err());
        assert!(parse_blob_uri("s3://images/").is_err());
    }
}
