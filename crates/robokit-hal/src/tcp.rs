//! [`TcpAdaptor`] – line-delimited JSON commands over a TCP socket.
//!
//! Each command is written as one JSON object per line:
//!
//! ```text
//! → {"command":"digital_write","args":[13,1]}
//! ← {"result":null}
//! ← {"error":"pin 13 is reserved"}
//! ```
//!
//! Useful for network-attached boards and for bridging to a simulator running
//! in another process.

use async_trait::async_trait;
use robokit_types::{Params, RobotError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::adaptor::Adaptor;

const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Serialize)]
struct WireRequest<'a> {
    command: &'a str,
    args: &'a [Value],
}

#[derive(Deserialize)]
struct WireReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Adaptor speaking line-delimited JSON to `host:port`.
pub struct TcpAdaptor {
    name: String,
    host: String,
    port: u16,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpAdaptor {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            stream: None,
        }
    }

    /// Build from connection parameters: `host` (default `127.0.0.1`) and
    /// `port` (required).
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Config`] when `port` is missing or out of range.
    pub fn from_params(name: impl Into<String>, params: &Params) -> Result<Self, RobotError> {
        let name = name.into();
        let port = params
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| {
                RobotError::Config(format!("connection '{name}': tcp adaptor needs a valid 'port'"))
            })?;
        let host = params
            .get("host")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_HOST)
            .to_string();
        Ok(Self::new(name, host, port))
    }

    fn io_error(&self, e: impl std::fmt::Display) -> RobotError {
        RobotError::connection(&self.name, format!("{}:{}: {e}", self.host, self.port))
    }

    async fn round_trip(&mut self, line: &str) -> Result<String, RobotError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(RobotError::connection(&self.name, "not connected"));
        };
        let mut reply = String::new();
        let io = async {
            stream.get_mut().write_all(line.as_bytes()).await?;
            stream.read_line(&mut reply).await
        }
        .await;
        match io {
            Ok(0) => {
                self.stream = None;
                Err(self.io_error("peer closed the connection"))
            }
            Ok(_) => Ok(reply),
            Err(e) => {
                self.stream = None;
                Err(self.io_error(e))
            }
        }
    }
}

#[async_trait]
impl Adaptor for TcpAdaptor {
    fn kind(&self) -> &str {
        "tcp"
    }

    async fn connect(&mut self) -> Result<(), RobotError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| self.io_error(e))?;
        info!(connection = %self.name, host = %self.host, port = self.port, "tcp channel open");
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), RobotError> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .get_mut()
                .shutdown()
                .await
                .map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }

    async fn command(&mut self, command: &str, args: &[Value]) -> Result<Value, RobotError> {
        let mut line = serde_json::to_string(&WireRequest { command, args })
            .map_err(|e| RobotError::Serialization(e.to_string()))?;
        line.push('\n');
        debug!(connection = %self.name, command, "tcp command");

        let raw = self.round_trip(&line).await?;
        let reply: WireReply = serde_json::from_str(raw.trim_end())
            .map_err(|e| RobotError::Serialization(format!("bad reply from {}: {e}", self.name)))?;
        match reply.error {
            Some(error) => Err(RobotError::connection(&self.name, error)),
            None => Ok(reply.result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Serves one client: echoes `args` back as the result, except for the
    /// `fail` command which answers with an error.
    async fn spawn_board() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let reply = if request["command"] == "fail" {
                    json!({ "error": "board refused" })
                } else {
                    json!({ "result": request["args"] })
                };
                let mut out = reply.to_string();
                out.push('\n');
                write.write_all(out.as_bytes()).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn command_round_trip() {
        let port = spawn_board().await;
        let mut tcp = TcpAdaptor::new("net", "127.0.0.1", port);
        tcp.connect().await.unwrap();

        let result = tcp.command("digital_write", &[json!(13), json!(1)]).await.unwrap();
        assert_eq!(result, json!([13, 1]));

        tcp.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn board_error_becomes_connection_error() {
        let port = spawn_board().await;
        let mut tcp = TcpAdaptor::new("net", "127.0.0.1", port);
        tcp.connect().await.unwrap();

        let err = tcp.command("fail", &[]).await.unwrap_err();
        assert_eq!(err, RobotError::connection("net", "board refused"));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut tcp = TcpAdaptor::new("net", "127.0.0.1", port);
        assert!(matches!(tcp.connect().await, Err(RobotError::Connection { .. })));
    }

    #[tokio::test]
    async fn command_before_connect_fails() {
        let mut tcp = TcpAdaptor::new("net", "127.0.0.1", 9);
        assert!(tcp.command("ping", &[]).await.is_err());
    }

    #[test]
    fn from_params_requires_port() {
        let params = Params::new();
        assert!(matches!(
            TcpAdaptor::from_params("net", &params),
            Err(RobotError::Config(_))
        ));

        let mut params = Params::new();
        params.insert("port".into(), json!(4000));
        let tcp = TcpAdaptor::from_params("net", &params).unwrap();
        assert_eq!(tcp.host, DEFAULT_HOST);
        assert_eq!(tcp.port, 4000);
    }
}
