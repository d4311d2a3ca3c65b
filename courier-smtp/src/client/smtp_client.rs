use std::sync::Arc;

use courier_common::{incoming, internal, outgoing};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{ClientConfig, RootCertStore, pki_types::ServerName},
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

const BUFFER_SIZE: usize = 8192;

/// Replies larger than this are treated as a protocol error.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

enum Connection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Connection {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }

        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let read = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };

        if read == 0 {
            return Err(ClientError::ConnectionClosed);
        }

        Ok(read)
    }

    async fn upgrade(self, domain: &str) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            ));
        };

        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            roots
                .add(cert)
                .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
        }
        if !native.errors.is_empty() {
            internal!(level = WARN, errors = ?native.errors, "Some native certificates could not be loaded");
        }

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

        let stream = TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))?;

        Ok(Self::Tls(Box::new(stream)))
    }
}

/// One SMTP session. Commands are sent one at a time and each call returns the
/// server's reply, whatever its code; callers decide what counts as failure.
pub struct SmtpClient {
    connection: Option<Connection>,
    buffer: Vec<u8>,
    filled: usize,
    server_domain: String,
}

impl SmtpClient {
    /// Open a plain TCP connection to `addr`. `server_domain` is the name the
    /// certificate is checked against after STARTTLS.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the connection cannot be established.
    pub async fn connect(addr: &str, server_domain: String) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            connection: Some(Connection::Plain(stream)),
            buffer: vec![0; BUFFER_SIZE],
            filled: 0,
            server_domain,
        })
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.connection, Some(Connection::Tls(_)))
    }

    /// # Errors
    ///
    /// Returns an error if the greeting cannot be read.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Send a raw command line and read the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!(command, "SMTP >");
        self.connection_mut()?
            .write(format!("{command}\r\n").as_bytes())
            .await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Send the message content after a `354`, dot-stuffed and terminated with
    /// `<CRLF>.<CRLF>`, and read the final reply.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or reading fails.
    pub async fn send_data(&mut self, content: &str) -> Result<Response> {
        let mut payload = dot_stuff(content);
        if !payload.ends_with("\r\n") {
            payload.push_str("\r\n");
        }
        payload.push_str(".\r\n");

        self.connection_mut()?.write(payload.as_bytes()).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// # Errors
    ///
    /// Returns an error if the command cannot be exchanged.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Issue STARTTLS and, if the server agrees, upgrade the connection. The
    /// caller must send EHLO again afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the command or the TLS handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            let connection = self
                .connection
                .take()
                .ok_or(ClientError::ConnectionClosed)?;
            self.connection = Some(connection.upgrade(&self.server_domain).await?);
            self.filled = 0;
        }

        Ok(response)
    }

    fn connection_mut(&mut self) -> Result<&mut Connection> {
        self.connection.as_mut().ok_or(ClientError::ConnectionClosed)
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse_response(&self.buffer[..self.filled])? {
                self.buffer.copy_within(consumed..self.filled, 0);
                self.filled -= consumed;

                incoming!(code = response.code, message = %response.message(), "SMTP <");
                return Ok(response);
            }

            if self.filled == self.buffer.len() {
                let grown = self.buffer.len() * 2;
                if grown > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(grown, 0);
            }

            let filled = self.filled;
            let read = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?
                .read(&mut self.buffer[filled..])
                .await?;
            self.filled += read;
        }
    }
}

/// Normalise line endings to CRLF and double any leading `.` (RFC 5321
/// section 4.5.2).
fn dot_stuff(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 16);

    for (index, line) in content.split('\n').enumerate() {
        if index > 0 {
            out.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
    }

    out
}
