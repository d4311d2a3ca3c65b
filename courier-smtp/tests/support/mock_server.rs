//! Scripted SMTP server for transport tests.
#![allow(dead_code)] // Shared between test crates; not every helper is used by each.
//!
//! Every command is recorded, replies are configurable per command (and per
//! recipient for `RCPT TO`), and the server can drop the connection after a
//! message to exercise reconnection.
//!
//! ```rust,no_run
//! # async fn example() -> std::io::Result<()> {
//! let server = MockSmtpServer::builder()
//!     .with_recipient_response("nobody@example.com", 550, "No such user")
//!     .build()
//!     .await?;
//!
//! // deliver to server.host() / server.port()
//!
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// The un-stuffed message content received after `DATA`.
    Content(String),
    Rset,
    Quit,
    StartTls,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct Script {
    greeting: Reply,
    ehlo_code: u16,
    capabilities: Vec<String>,
    helo: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    recipients: HashMap<String, Reply>,
    data: Reply,
    data_end: Reply,
    starttls: Option<Reply>,
    drop_after_message: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.example.com ESMTP"),
            ehlo_code: 250,
            capabilities: vec!["mock.example.com".to_string(), "SIZE 10000000".to_string()],
            helo: Reply::new(250, "Hello"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            recipients: HashMap::new(),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "OK: queued"),
            starttls: None,
            drop_after_message: false,
        }
    }
}

impl Script {
    fn ehlo_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        let last = self.capabilities.len().saturating_sub(1);

        for (i, capability) in self.capabilities.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            let _ = write!(out, "{}{separator}{capability}\r\n", self.ehlo_code);
        }

        out.into_bytes()
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// Contents of every message accepted so far.
    pub async fn messages(&self) -> Vec<String> {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::Content(content) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        mut stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(&script.greeting.to_bytes()).await?;

        loop {
            line.clear();
            match timeout(Duration::from_secs(10), reader.read_line(&mut line)).await {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(result) => result?,
            };

            let command_line = line.trim_end();
            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line, ""));

            let (reply, command) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => {
                    let reply = if script.ehlo_code == 250 {
                        script.ehlo_bytes()
                    } else {
                        Reply::new(script.ehlo_code, "Command not recognised").to_bytes()
                    };
                    (reply, SmtpCommand::Ehlo(argument.to_string()))
                }
                "HELO" => (script.helo.to_bytes(), SmtpCommand::Helo(argument.to_string())),
                "MAIL" => (
                    script.mail_from.to_bytes(),
                    SmtpCommand::MailFrom(path(argument)),
                ),
                "RCPT" => {
                    let recipient = path(argument);
                    let reply = script.recipients.get(&recipient).unwrap_or(&script.rcpt_to);
                    (reply.to_bytes(), SmtpCommand::RcptTo(recipient))
                }
                "DATA" => (script.data.to_bytes(), SmtpCommand::Data),
                "RSET" => (Reply::new(250, "OK").to_bytes(), SmtpCommand::Rset),
                "STARTTLS" => (
                    script
                        .starttls
                        .as_ref()
                        .map_or_else(
                            || Reply::new(502, "Command not implemented"),
                            Clone::clone,
                        )
                        .to_bytes(),
                    SmtpCommand::StartTls,
                ),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&Reply::new(221, "Bye").to_bytes()).await?;
                    return Ok(());
                }
                _ => (
                    Reply::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(command_line.to_string()),
                ),
            };

            let is_data = command == SmtpCommand::Data;
            commands.write().await.push(command);
            writer.write_all(&reply).await?;

            if is_data && script.data.code == 354 {
                let mut content = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await? == 0 {
                        return Ok(());
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    content.push_str(line.strip_prefix('.').unwrap_or(&line));
                }

                commands.write().await.push(SmtpCommand::Content(content));
                writer.write_all(&script.data_end.to_bytes()).await?;

                if script.drop_after_message {
                    return Ok(());
                }
            }
        }
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// `TO:<a@b>` or `FROM:<a@b>` to `a@b`.
fn path(argument: &str) -> String {
    let argument = argument
        .split_once(':')
        .map_or(argument, |(_, path)| path)
        .trim();

    argument
        .strip_prefix('<')
        .and_then(|path| path.split_once('>'))
        .map_or(argument, |(path, _)| path)
        .to_string()
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.greeting = Reply::new(code, message);
        self
    }

    /// Reply to EHLO with `code`; anything but 250 makes the client fall back
    /// to HELO.
    #[must_use]
    pub const fn with_ehlo_code(mut self, code: u16) -> Self {
        self.script.ehlo_code = code;
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.script.capabilities.push(capability.into());
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.mail_from = Reply::new(code, message);
        self
    }

    /// Default reply for every `RCPT TO`.
    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_recipient_response(
        mut self,
        recipient: impl Into<String>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        self.script
            .recipients
            .insert(recipient.into(), Reply::new(code, message));
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.data = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.data_end = Reply::new(code, message);
        self
    }

    /// Advertise STARTTLS and answer it with `code`.
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.capabilities.push("STARTTLS".to_string());
        self.script.starttls = Some(Reply::new(code, message));
        self
    }

    /// Close the connection right after acknowledging each message.
    #[must_use]
    pub const fn with_drop_after_message(mut self) -> Self {
        self.script.drop_after_message = true;
        self
    }

    /// Bind to a random local port and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        {
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            let shutdown = Arc::clone(&shutdown);

            tokio::spawn(async move {
                while !shutdown.load(Ordering::Relaxed) {
                    let Ok(Ok((stream, _peer))) =
                        timeout(Duration::from_millis(100), listener.accept()).await
                    else {
                        continue;
                    };

                    connections.fetch_add(1, Ordering::Relaxed);
                    let script = Arc::clone(&script);
                    let commands = Arc::clone(&commands);

                    tokio::spawn(async move {
                        if let Err(error) =
                            MockSmtpServer::handle_client(stream, script, commands).await
                        {
                            tracing::debug!(%error, "Mock server client error");
                        }
                    });
                }
            });
        }

        Ok(MockSmtpServer {
            addr,
            commands,
            connections,
            shutdown,
        })
    }
}
