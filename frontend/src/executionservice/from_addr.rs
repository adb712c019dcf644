use url::Url;

use super::{
    BuildOpts, DummyExecutionService, ExecutionService, GRPCExecutionService,
    MemoryExecutionService,
};
use crate::proto::LlbBridgeClient;

/// Constructs a new instance of an [ExecutionService] from an URI.
///
/// The following schemes are supported by the following services:
/// - `dummy://` ([DummyExecutionService])
/// - `memory://` ([MemoryExecutionService]), optionally with the path of a
///   directory local sources are served from
/// - `grpc+*://` ([GRPCExecutionService])
pub async fn from_addr(
    uri: &str,
    build_opts: BuildOpts,
) -> std::io::Result<Box<dyn ExecutionService>> {
    let url = Url::parse(uri)
        .map_err(|e| std::io::Error::other(format!("unable to parse url: {}", e)))?;

    Ok(match url.scheme() {
        // dummy doesn't care about parameters.
        "dummy" => Box::new(DummyExecutionService::new(build_opts)),
        "memory" => {
            if url.host_str().is_some_and(|host| !host.is_empty()) {
                Err(std::io::Error::other("memory may not have a host"))?
            }

            let service = MemoryExecutionService::new(build_opts);
            Box::new(if url.path().is_empty() {
                service
            } else {
                service.with_context_dir(url.path())
            })
        }
        scheme => {
            if scheme.starts_with("grpc+") {
                let client = LlbBridgeClient::new(
                    crate::tonic::channel_from_url(&url)
                        .await
                        .map_err(std::io::Error::other)?,
                );
                Box::new(GRPCExecutionService::from_client(client, build_opts))
            } else {
                Err(std::io::Error::other(format!(
                    "unknown scheme: {}",
                    url.scheme()
                )))?
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::from_addr;
    use crate::executionservice::BuildOpts;

    static TMPDIR_CONTEXT: LazyLock<TempDir> = LazyLock::new(|| TempDir::new().unwrap());

    #[rstest]
    /// This uses an unsupported scheme.
    #[case::unsupported_scheme("http://foo.example/test", false)]
    /// This configures dummy
    #[case::valid_dummy("dummy://", true)]
    /// In-memory, without context dir.
    #[case::valid_memory("memory://", true)]
    /// In-memory, serving local sources from a directory.
    #[case::valid_memory_context_dir(&format!("memory://{}", TMPDIR_CONTEXT.path().to_str().unwrap()), true)]
    /// In-memory, but with a host.
    #[case::memory_with_host("memory://host.example/context", false)]
    /// Correct scheme to connect to a unix socket.
    #[case::grpc_valid_unix_socket("grpc+unix:///run/buildkit/frontend.sock", true)]
    /// Correct scheme for unix socket, but setting a host too, which is invalid.
    #[case::grpc_invalid_unix_socket_and_host("grpc+unix://host.example/path/to/somewhere", false)]
    /// Correct scheme to connect to localhost, with port 12345
    #[case::grpc_valid_ipv6_localhost_port_12345("grpc+http://[::1]:12345", true)]
    /// Correct scheme to connect to localhost over https, without specifying a port.
    #[case::grpc_valid_https_host_without_port("grpc+https://localhost", true)]
    /// Correct scheme to connect to localhost over http, but with additional path, which is invalid.
    #[case::grpc_invalid_host_and_path("grpc+http://localhost/some-path", false)]
    #[tokio::test]
    async fn test_from_addr(#[case] uri_str: &str, #[case] exp_succeed: bool) {
        let build_opts = BuildOpts {
            session_id: "session".into(),
            ..Default::default()
        };

        let resp = from_addr(uri_str, build_opts.clone()).await;

        if exp_succeed {
            let service = resp.expect("should succeed");
            assert_eq!(&build_opts, service.build_opts());
        } else {
            assert!(resp.is_err(), "should fail");
        }
    }
}
