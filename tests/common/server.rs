//! Test server management.
//!
//! Spawns and manages natterd instances for integration testing.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tokio::time::sleep;

use natter_proto::v1::LoginRequest;
use natter_proto::v1::auth_client::AuthClient;
use tonic::transport::Channel;

/// A test server instance.
pub struct TestServer {
    child: Child,
    socket_port: u16,
    grpc_port: u16,
    data_dir: PathBuf,
}

impl TestServer {
    /// Spawn a new test server on the two given loopback ports.
    pub async fn spawn(socket_port: u16, grpc_port: u16) -> anyhow::Result<Self> {
        Self::spawn_with_timeout(socket_port, grpc_port, 15).await
    }

    /// Spawn with a custom socket handshake timeout, for timeout tests.
    pub async fn spawn_with_timeout(
        socket_port: u16,
        grpc_port: u16,
        handshake_timeout_secs: u64,
    ) -> anyhow::Result<Self> {
        // Temporary directory for the database and config.
        let data_dir = std::env::temp_dir().join(format!("natterd-test-{socket_port}"));
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join("config.toml");
        let config_content = format!(
            r#"
[server]
name = "test.natterd"

[listen]
addr = "127.0.0.1:{socket_port}"

[grpc]
addr = "127.0.0.1:{grpc_port}"

[database]
path = "{}/test.db"

[limits]
handshake_timeout_secs = {handshake_timeout_secs}
replay_depth = 5
"#,
            data_dir.display()
        );
        std::fs::write(&config_path, config_content)?;

        // The binary lands in the workspace target dir.
        let binary_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("target/debug/natterd");

        let child = Command::new(&binary_path)
            .arg(config_path.to_str().expect("config path is valid UTF-8"))
            .spawn()?;

        let server = Self {
            child,
            socket_port,
            grpc_port,
            data_dir,
        };

        server.wait_until_ready().await?;
        Ok(server)
    }

    /// Wait until both listeners accept connections.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            let socket_up = tokio::net::TcpStream::connect(("127.0.0.1", self.socket_port))
                .await
                .is_ok();
            let grpc_up = tokio::net::TcpStream::connect(("127.0.0.1", self.grpc_port))
                .await
                .is_ok();
            if socket_up && grpc_up {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("server failed to start within 5 seconds")
    }

    /// Address of the socket transport.
    pub fn socket_addr(&self) -> String {
        format!("127.0.0.1:{}", self.socket_port)
    }

    /// URL of the gRPC listener.
    pub fn grpc_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.grpc_port)
    }

    /// Fresh `Auth` client against this server.
    pub async fn auth_client(&self) -> anyhow::Result<AuthClient<Channel>> {
        Ok(AuthClient::connect(self.grpc_url()).await?)
    }

    /// Log in over gRPC and return the session token.
    pub async fn login(&self, username: &str, password: &str) -> anyhow::Result<String> {
        let mut auth = self.auth_client().await?;
        let resp = auth
            .login(LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?
            .into_inner();
        if !resp.success {
            anyhow::bail!("login failed for {username}: {}", resp.message);
        }
        Ok(resp.token)
    }

    /// Create a new socket client connected to this server.
    pub async fn connect(&self) -> anyhow::Result<super::client::TestClient> {
        super::client::TestClient::connect(&self.socket_addr()).await
    }

    /// Connect a socket client and complete its token handshake.
    pub async fn attach(&self, token: &str) -> anyhow::Result<super::client::TestClient> {
        let mut client = self.connect().await?;
        client.authenticate(token).await?;
        Ok(client)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}
