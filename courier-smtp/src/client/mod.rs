//! A small SMTP client: plain TCP with an optional STARTTLS upgrade, one
//! command at a time.
//!
//! ```no_run
//! use courier_smtp::client::SmtpClient;
//!
//! # async fn example() -> Result<(), courier_smtp::ClientError> {
//! let mut client = SmtpClient::connect("localhost:25", "localhost".to_string()).await?;
//! client.read_greeting().await?;
//! client.ehlo("courier.example.com").await?;
//! client.mail_from("sender@example.com").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! client.send_data("Subject: Hi\r\n\r\nHello\r\n").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
