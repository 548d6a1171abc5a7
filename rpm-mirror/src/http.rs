// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP access to RPM repositories. */

use {
    crate::{
        error::{MirrorError, Result},
        platform::Remote,
        DataResolver, RepositoryRootReader,
    },
    futures::{AsyncRead, TryStreamExt},
    reqwest::{Certificate, Client, ClientBuilder, Identity, IntoUrl, Proxy, StatusCode, Url},
    std::{future::Future, pin::Pin},
};

/// Default HTTP user agent string.
pub const USER_AGENT: &str = "rpm-mirror Rust crate (https://github.com/indygreg/PyOxidizer)";

fn fetch_error(path: &str, kind: std::io::ErrorKind, message: String) -> MirrorError {
    MirrorError::RemoteFetch {
        path: path.to_string(),
        source: std::io::Error::new(kind, message),
    }
}

/// Client for RPM repositories served via HTTP.
///
/// Instances are bound to a base URL, which represents the base directory.
#[derive(Debug)]
pub struct HttpRepositoryClient {
    /// HTTP client to use.
    client: Client,

    /// Base URL for this repository.
    root_url: Url,

    /// Basic authentication credentials sent with every request.
    credentials: Option<(String, Option<String>)>,
}

impl HttpRepositoryClient {
    /// Construct an instance bound to the specified URL.
    pub fn new(url: impl IntoUrl) -> Result<Self> {
        let builder = ClientBuilder::new().user_agent(USER_AGENT);

        Self::new_client(builder.build()?, url)
    }

    pub fn new_client(client: Client, url: impl IntoUrl) -> Result<Self> {
        let mut root_url = url.into_url()?;

        // Trailing URLs are significant to the Url type when we .join(). So ensure
        // the URL has a trailing path.
        if !root_url.path().ends_with('/') {
            root_url.set_path(&format!("{}/", root_url.path()));
        }

        Ok(Self {
            client,
            root_url,
            credentials: None,
        })
    }

    /// Construct an instance honoring the transport settings of a [Remote].
    pub fn from_remote(remote: &Remote) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .connect_timeout(remote.connect_timeout)
            .timeout(remote.total_timeout)
            .danger_accept_invalid_certs(!remote.tls_validation);

        if let Some(proxy) = &remote.proxy_url {
            builder = builder.proxy(Proxy::all(proxy.as_str())?);
        }

        if let Some(ca_cert) = &remote.ca_cert {
            builder = builder.add_root_certificate(Certificate::from_pem(ca_cert.as_bytes())?);
        }

        match (&remote.client_cert, &remote.client_key) {
            (Some(cert), Some(key)) => {
                let pem = format!("{}\n{}", cert.trim_end(), key);
                builder = builder.identity(Identity::from_pem(pem.as_bytes())?);
            }
            (Some(cert), None) => {
                builder = builder.identity(Identity::from_pem(cert.as_bytes())?);
            }
            (None, Some(_)) => {
                return Err(MirrorError::InvalidRequest(
                    "client key configured without client certificate".to_string(),
                ));
            }
            (None, None) => {}
        }

        let mut client = Self::new_client(builder.build()?, remote.url.clone())?;

        if let Some(username) = &remote.username {
            client.credentials = Some((username.clone(), remote.password.clone()));
        }

        Ok(client)
    }

    async fn fetch_url(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let request_url = self.root_url.join(path)?;

        let mut request = self.client.get(request_url.clone());
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, password.as_ref());
        }

        log::debug!("fetching {}", request_url);

        let res = request.send().await.map_err(|e| {
            fetch_error(
                path,
                std::io::ErrorKind::Other,
                format!("error sending HTTP request: {:?}", e),
            )
        })?;

        let res = res.error_for_status().map_err(|e| {
            if e.status() == Some(StatusCode::NOT_FOUND) {
                fetch_error(
                    path,
                    std::io::ErrorKind::NotFound,
                    format!("HTTP 404 for {}", request_url),
                )
            } else {
                fetch_error(
                    path,
                    std::io::ErrorKind::Other,
                    format!("bad HTTP status code: {:?}", e),
                )
            }
        })?;

        Ok(Box::pin(
            res.bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e)))
                .into_async_read(),
        ))
    }
}

impl DataResolver for HttpRepositoryClient {
    #[allow(clippy::type_complexity)]
    fn get_path(
        &self,
        path: String,
    ) -> Pin<Box<dyn Future<Output = Result<Pin<Box<dyn AsyncRead + Send>>>> + Send + '_>> {
        async fn run(
            slf: &HttpRepositoryClient,
            path: String,
        ) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
            slf.fetch_url(&path).await
        }

        Box::pin(run(self, path))
    }
}

impl RepositoryRootReader for HttpRepositoryClient {
    fn url(&self) -> Result<Url> {
        Ok(self.root_url.clone())
    }
}
