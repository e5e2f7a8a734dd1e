use std::fmt;

use anyhow::{Context, Result};
use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;

const SET_CUSTOM_COMMAND: &str = "namecheap.domains.dns.setCustom";
const UNKNOWN_ERROR: &str = "Unknown error from Namecheap";

/// Account credentials sent with every Namecheap call.
#[derive(Clone)]
pub struct Credentials {
    pub api_user: String,
    pub api_key: String,
    pub client_ip: String,
}

// Keep the key out of logs and panic messages.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_user", &self.api_user)
            .field("api_key", &"<redacted>")
            .field("client_ip", &self.client_ip)
            .finish()
    }
}

/// Splits `example.co.uk` into `("example.co", "uk")`.
///
/// Returns `None` when there is no dot at all. Empty labels are passed
/// through untouched and left for Namecheap to reject.
pub fn split_domain(domain: &str) -> Option<(&str, &str)> {
    domain.rsplit_once('.')
}

#[derive(Debug, Clone)]
pub struct NamecheapClient {
    client: Client,
    endpoint: String,
}

impl NamecheapClient {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Calls `namecheap.domains.dns.setCustom` for one domain.
    ///
    /// Transport failures, non-2xx statuses and unparsable bodies come back as
    /// `Err`. An `ApiResponse` with a non-OK status is a successful call and is
    /// returned as a reply for the caller to inspect.
    pub async fn set_custom_nameservers(
        &self,
        credentials: &Credentials,
        sld: &str,
        tld: &str,
        nameservers: &[String],
    ) -> Result<NamecheapReply> {
        let nameservers = nameservers.join(",");
        let params = [
            ("ApiUser", credentials.api_user.as_str()),
            ("ApiKey", credentials.api_key.as_str()),
            ("UserName", credentials.api_user.as_str()),
            ("Command", SET_CUSTOM_COMMAND),
            ("ClientIp", credentials.client_ip.as_str()),
            ("SLD", sld),
            ("TLD", tld),
            ("Nameservers", nameservers.as_str()),
        ];

        // reqwest puts the full URL (and with it the API key) into its error
        // messages, so strip it before anything gets logged or streamed.
        let xml = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to send request to Namecheap")?
            .error_for_status()
            .map_err(reqwest::Error::without_url)
            .context("Namecheap returned an error status")?
            .text()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to read Namecheap response")?;

        debug!("Namecheap replied with {} bytes for {}.{}", xml.len(), sld, tld);

        decode_reply(&xml)
    }
}

/// The parts of a Namecheap `ApiResponse` we act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamecheapReply {
    /// `Status` attribute of the root `ApiResponse`, `None` if the document
    /// has a different root.
    pub status: Option<String>,
    /// First entry of `ApiResponse/Errors`.
    pub error: Option<UpstreamError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub number: Option<String>,
    pub text: String,
    /// Name and attributes as written, e.g. `Error Source="x"`.
    pub tag: String,
}

impl NamecheapReply {
    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("OK")
    }

    pub fn error_message(&self) -> String {
        match &self.error {
            Some(err) if !err.text.is_empty() => err.text.clone(),
            Some(UpstreamError {
                number: Some(number),
                ..
            }) => format!("Namecheap error {}", number),
            Some(err) => format!("Namecheap error <{}/>", err.tag),
            None => UNKNOWN_ERROR.to_string(),
        }
    }
}

pub fn decode_reply(xml: &str) -> Result<NamecheapReply> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut decoder = ReplyDecoder::default();
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        match reader
            .read_event()
            .context("Failed to parse Namecheap response")?
        {
            Event::Start(tag) => {
                seen_root = true;
                decoder.open(&tag, depth)?;
                depth += 1;
            }
            Event::Empty(tag) => {
                seen_root = true;
                decoder.open(&tag, depth)?;
                decoder.close(depth);
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                decoder.close(depth);
            }
            Event::Text(text) => {
                if let Some(current) = decoder.current.as_mut() {
                    let text = text
                        .unescape()
                        .context("Failed to parse Namecheap response")?;
                    current.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(current) = decoder.current.as_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => {
                if !seen_root || depth != 0 {
                    return Err(anyhow::anyhow!(
                        "document ended with {} unclosed element(s)",
                        depth
                    ))
                    .context("Failed to parse Namecheap response");
                }
                break;
            }
            _ => {}
        }
    }

    Ok(decoder.reply)
}

#[derive(Default)]
struct ReplyDecoder {
    reply: NamecheapReply,
    in_root: bool,
    in_errors: bool,
    current: Option<UpstreamError>,
}

impl ReplyDecoder {
    fn open(&mut self, tag: &BytesStart<'_>, depth: usize) -> Result<()> {
        let name = tag.local_name();
        match (depth, name.as_ref()) {
            (0, b"ApiResponse") => {
                self.in_root = true;
                self.reply.status = attribute(tag, "Status")?;
            }
            (1, b"Errors") if self.in_root => self.in_errors = true,
            (2, b"Error") if self.in_errors && self.reply.error.is_none() => {
                self.current = Some(UpstreamError {
                    number: attribute(tag, "Number")?,
                    text: String::new(),
                    tag: String::from_utf8_lossy(tag).trim().to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, depth: usize) {
        match depth {
            2 => {
                if let Some(mut err) = self.current.take() {
                    err.text = err.text.trim().to_string();
                    self.reply.error = Some(err);
                }
            }
            1 => self.in_errors = false,
            _ => {}
        }
    }
}

fn attribute(tag: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    let Some(attr) = tag
        .try_get_attribute(name)
        .context("Failed to parse Namecheap response")?
    else {
        return Ok(None);
    };
    let value = attr
        .unescape_value()
        .context("Failed to parse Namecheap response")?;
    Ok(Some(value.into_owned()))
}
