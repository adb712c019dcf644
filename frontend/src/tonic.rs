use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint};

/// Errors occuring when trying to connect to the execution service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("grpc+ prefix is missing from URL")]
    MissingGRPCPrefix,

    #[error("host may not be set for unix domain sockets")]
    HostSetForUnixSocket,

    #[error("path may not be set")]
    PathMayNotBeSet,

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Turns a [url::Url] into a [Channel]:
///  - `grpc+unix:///path/to/socket` connects to a unix domain socket
///  - `grpc+http://host:port` connects over unencrypted HTTP/2
///  - `grpc+https://host:port` connects over encrypted HTTP/2
///
/// Connections are established lazily, on the first request, unless
/// `wait-connect=1` is passed as URL parameter.
pub async fn channel_from_url(url: &url::Url) -> Result<Channel, Error> {
    let wait_connect = url
        .query_pairs()
        .any(|(k, v)| k == "wait-connect" && v == "1");

    if url.scheme() == "grpc+unix" {
        if url.host_str().is_some() {
            return Err(Error::HostSetForUnixSocket);
        }

        let path = url.path().to_string();
        let connector = tower::service_fn(move |_: tonic::transport::Uri| {
            let path = path.clone();
            async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
        });

        // the authority is never resolved
        let endpoint = Endpoint::from_static("http://[::]:50051");
        return Ok(if wait_connect {
            endpoint.connect_with_connector(connector).await?
        } else {
            endpoint.connect_with_connector_lazy(connector)
        });
    }

    if !url.path().is_empty() {
        return Err(Error::PathMayNotBeSet);
    }

    // url refuses to change the scheme to http(s), so go through the string.
    let endpoint = Endpoint::try_from(
        url.as_str()
            .strip_prefix("grpc+")
            .ok_or(Error::MissingGRPCPrefix)?
            .to_string(),
    )?;
    Ok(if wait_connect {
        endpoint.connect().await?
    } else {
        endpoint.connect_lazy()
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use url::Url;

    use super::channel_from_url;

    #[rstest]
    /// The default BuildKit frontend socket.
    #[case::unix_socket("grpc+unix:///run/buildkit/frontend.sock", true)]
    /// Waiting for the connection fails, the socket doesn't exist.
    #[case::unix_socket_wait_connect("grpc+unix:///nonexistent/frontend.sock?wait-connect=1", false)]
    /// A host makes no sense for a unix socket.
    #[case::unix_socket_with_host("grpc+unix://buildkitd/run/buildkit/frontend.sock", false)]
    #[case::http_port("grpc+http://[::1]:1234", true)]
    #[case::http_without_port("grpc+http://localhost", true)]
    #[case::https_without_port("grpc+https://localhost", true)]
    /// gRPC has no use for a path.
    #[case::http_with_path("grpc+http://localhost/frontend", false)]
    /// Waiting for the connection fails, the host doesn't exist.
    #[case::http_wait_connect("grpc+http://nonexist.invalid?wait-connect=1", false)]
    /// Only grpc+ URLs are accepted.
    #[case::plain_http("http://localhost", false)]
    #[tokio::test]
    async fn test_channel_from_url(#[case] uri_str: &str, #[case] is_ok: bool) {
        let url = Url::parse(uri_str).expect("must parse");
        assert_eq!(is_ok, channel_from_url(&url).await.is_ok())
    }
}
