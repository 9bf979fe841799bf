use crate::dht::client::{DhtClient, DhtError, RecordKey};
use async_trait::async_trait;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// One request to the DHT service daemon, as a single JSON line.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    CreateRecord { subkey_count: u32 },
    OpenRecord { key: String },
    SetSubkey { key: String, subkey: u32, value: String },
    GetSubkey { key: String, subkey: u32 },
    CloseRecord { key: String },
    DeleteRecord { key: String },
}

#[derive(Debug, Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    subkey_count: Option<u32>,
    #[serde(default)]
    value: Option<String>,
}

/// Client for a DHT service daemon reachable over TCP.
///
/// The wire protocol is newline-delimited JSON, one request and one response
/// per line. Subkey values travel hex-encoded. A mutex serializes use of the
/// stream since responses carry no correlation id.
pub struct RemoteDht {
    stream: Mutex<(BufReader<OwnedReadHalf>, OwnedWriteHalf)>,
    addr: String,
}

impl RemoteDht {
    /// Connects to the service daemon at `host:port`.
    pub async fn connect(addr: &str) -> io::Result<Self> {
        debug!("Connecting to DHT service at {}", addr);
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            stream: Mutex::new((BufReader::new(read_half), write_half)),
            addr: addr.to_string(),
        })
    }

    /// Sends one request and reads one response line.
    async fn roundtrip(&self, request: &Request) -> io::Result<Response> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');

        let mut guard = self.stream.lock().await;
        trace!("-> {} {}", self.addr, line.trim_end());

        guard.1.write_all(line.as_bytes()).await?;
        guard.1.flush().await?;

        let mut reply = String::new();
        let n = guard.0.read_line(&mut reply).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "DHT service closed the connection",
            ));
        }
        trace!("<- {} {}", self.addr, reply.trim_end());

        Ok(serde_json::from_str(&reply)?)
    }

    /// Runs a request, mapping transport and service failures through `fail`.
    async fn call(
        &self,
        request: Request,
        fail: fn(String) -> DhtError,
    ) -> Result<Response, DhtError> {
        let response = self
            .roundtrip(&request)
            .await
            .map_err(|e| fail(e.to_string()))?;

        if !response.ok {
            let reason = response.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(fail(reason));
        }

        Ok(response)
    }
}

#[async_trait]
impl DhtClient for RemoteDht {
    async fn create_record(&self, subkey_count: u32) -> Result<RecordKey, DhtError> {
        let response = self
            .call(
                Request::CreateRecord { subkey_count },
                DhtError::RecordCreation,
            )
            .await?;

        let token = response
            .key
            .ok_or_else(|| DhtError::RecordCreation("service returned no key".to_string()))?;

        RecordKey::from_token(&token).map_err(|e| DhtError::RecordCreation(e.to_string()))
    }

    async fn open_record(&self, key: &RecordKey) -> Result<u32, DhtError> {
        let response = self
            .call(
                Request::OpenRecord {
                    key: key.to_token(),
                },
                DhtError::RecordNotFound,
            )
            .await?;

        response
            .subkey_count
            .ok_or_else(|| DhtError::RecordNotFound("service returned no subkey count".to_string()))
    }

    async fn set_subkey(
        &self,
        key: &RecordKey,
        subkey: u32,
        value: Vec<u8>,
    ) -> Result<(), DhtError> {
        self.call(
            Request::SetSubkey {
                key: key.to_token(),
                subkey,
                value: hex::encode(value),
            },
            DhtError::Write,
        )
        .await?;

        Ok(())
    }

    async fn get_subkey(&self, key: &RecordKey, subkey: u32) -> Result<Option<Vec<u8>>, DhtError> {
        let response = self
            .call(
                Request::GetSubkey {
                    key: key.to_token(),
                    subkey,
                },
                DhtError::Read,
            )
            .await?;

        match response.value {
            Some(value) => {
                let bytes = hex::decode(value).map_err(|e| DhtError::Read(e.to_string()))?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    async fn close_record(&self, key: &RecordKey) -> Result<(), DhtError> {
        self.call(
            Request::CloseRecord {
                key: key.to_token(),
            },
            DhtError::Write,
        )
        .await?;

        Ok(())
    }

    async fn delete_record(&self, key: &RecordKey) -> Result<(), DhtError> {
        self.call(
            Request::DeleteRecord {
                key: key.to_token(),
            },
            DhtError::Write,
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = Request::SetSubkey {
            key: "VLD0:aa".to_string(),
            subkey: 1,
            value: "00ff".to_string(),
        };

        let line = serde_json::to_string(&request).unwrap();
        assert_eq!(
            line,
            r#"{"op":"set_subkey","key":"VLD0:aa","subkey":1,"value":"00ff"}"#
        );
    }

    #[test]
    fn test_response_with_missing_fields() {
        let response: Response = serde_json::from_str(r#"{"ok":true}"#).unwrap();

        assert!(response.ok);
        assert!(response.error.is_none());
        assert!(response.key.is_none());
        assert!(response.subkey_count.is_none());
        assert!(response.value.is_none());
    }

    #[test]
    fn test_error_response() {
        let response: Response =
            serde_json::from_str(r#"{"ok":false,"error":"no such record"}"#).unwrap();

        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("no such record"));
    }
}
