use crate::p2p_error::P2pError;
use core::str;

pub const EUF_GUID_DISPLAY_PICTURE: &str = "{A4268EEC-FEC5-49E5-95C3-F126696BDBF6}";
pub const EUF_GUID_FILE_TRANSFER: &str = "{5D3E02AB-6190-11D3-BBBB-00C04F795683}";

pub const CONTENT_TYPE_SESSION: &str = "application/x-msnmsgr-sessionreqbody";
pub const CONTENT_TYPE_SESSION_CLOSE: &str = "application/x-msnmsgr-sessionclosebody";
pub const CONTENT_TYPE_TRANSFER: &str = "application/x-msnmsgr-transreqbody";

/// Ordered key/value properties of an MSNSLP body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlpBody {
    entries: Vec<(String, String)>,
}

impl SlpBody {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(entry, _)| entry == key) {
            entry.1 = value.to_string();
            return;
        }

        self.entries.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|value| value.parse().ok())
    }

    fn parse(body: &str) -> Self {
        let mut entries = Self::new();
        for line in body.lines() {
            if let Some((key, value)) = line.split_once(": ") {
                entries.set(key, value);
            }
        }

        entries
    }

    /// Bodies end with an empty line and a NUL, even when they carry no
    /// properties.
    fn to_wire(&self) -> String {
        let mut body = String::new();
        for (key, value) in &self.entries {
            body.push_str(format!("{key}: {value}\r\n").as_str());
        }

        body.push_str("\r\n\0");
        body
    }
}

/// An MSNSLP request such as INVITE or BYE.
#[derive(Debug, Clone, PartialEq)]
pub struct SlpRequest {
    pub method: String,
    pub uri: String,
    pub to: String,
    pub from: String,
    pub branch: String,
    pub cseq: u32,
    pub call_id: String,
    pub max_forwards: u32,
    pub content_type: String,
    pub body: SlpBody,
}

impl SlpRequest {
    /// A fresh INVITE with random branch and call IDs.
    pub fn invite(to: &str, from: &str, content_type: &str, body: SlpBody) -> Self {
        Self {
            method: "INVITE".to_string(),
            uri: format!("MSNMSGR:{to}"),
            to: to.to_string(),
            from: from.to_string(),
            branch: guid_create::GUID::rand().to_string(),
            cseq: 0,
            call_id: guid_create::GUID::rand().to_string(),
            max_forwards: 0,
            content_type: content_type.to_string(),
            body: SlpBody::new(),
        }
        .with_body(body)
    }

    /// A BYE closing an established call.
    pub fn bye(to: &str, from: &str, branch: &str, call_id: &str) -> Self {
        Self {
            method: "BYE".to_string(),
            uri: format!("MSNMSGR:{to}"),
            to: to.to_string(),
            from: from.to_string(),
            branch: branch.to_string(),
            cseq: 0,
            call_id: call_id.to_string(),
            max_forwards: 0,
            content_type: CONTENT_TYPE_SESSION_CLOSE.to_string(),
            body: SlpBody::new(),
        }
    }

    fn with_body(mut self, body: SlpBody) -> Self {
        self.body = body;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body.to_wire();

        let mut headers = format!("{} {} MSNSLP/1.0\r\n", self.method, self.uri);
        headers.push_str(format!("To: <msnmsgr:{}>\r\n", self.to).as_str());
        headers.push_str(format!("From: <msnmsgr:{}>\r\n", self.from).as_str());
        headers.push_str(format!("Via: MSNSLP/1.0/TLP ;branch={{{}}}\r\n", self.branch).as_str());
        headers.push_str(format!("CSeq: {}\r\n", self.cseq).as_str());
        headers.push_str(format!("Call-ID: {{{}}}\r\n", self.call_id).as_str());
        headers.push_str(format!("Max-Forwards: {}\r\n", self.max_forwards).as_str());
        headers.push_str(format!("Content-Type: {}\r\n", self.content_type).as_str());
        headers.push_str(format!("Content-Length: {}\r\n\r\n", body.len()).as_str());

        format!("{headers}{body}").into_bytes()
    }
}

/// An MSNSLP status response such as 200 OK or 603 Decline.
#[derive(Debug, Clone, PartialEq)]
pub struct SlpResponse {
    pub status_code: u16,
    pub reason: String,
    pub to: String,
    pub from: String,
    pub branch: String,
    pub cseq: u32,
    pub call_id: String,
    pub max_forwards: u32,
    pub content_type: String,
    pub body: SlpBody,
}

impl SlpResponse {
    /// A response mirroring a request: To and From swapped, same branch
    /// and call ID, CSeq one higher.
    fn mirroring(request: &SlpRequest, status_code: u16, reason: &str) -> Self {
        Self {
            status_code,
            reason: reason.to_string(),
            to: request.from.clone(),
            from: request.to.clone(),
            branch: request.branch.clone(),
            cseq: request.cseq + 1,
            call_id: request.call_id.clone(),
            max_forwards: 0,
            content_type: request.content_type.clone(),
            body: SlpBody::new(),
        }
    }

    pub fn ok_to(request: &SlpRequest, body: SlpBody) -> Self {
        let mut response = Self::mirroring(request, 200, "OK");
        response.body = body;
        response
    }

    pub fn decline_to(request: &SlpRequest) -> Self {
        let mut response = Self::mirroring(request, 603, "Decline");
        if let Some(session_id) = request.body.get("SessionID") {
            response.body.set("SessionID", session_id);
        }

        response
    }

    pub fn not_supported_to(request: &SlpRequest) -> Self {
        Self::mirroring(request, 405, "Not Supported")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body.to_wire();

        let mut headers = format!("MSNSLP/1.0 {} {}\r\n", self.status_code, self.reason);
        headers.push_str(format!("To: <msnmsgr:{}>\r\n", self.to).as_str());
        headers.push_str(format!("From: <msnmsgr:{}>\r\n", self.from).as_str());
        headers.push_str(format!("Via: MSNSLP/1.0/TLP ;branch={{{}}}\r\n", self.branch).as_str());
        headers.push_str(format!("CSeq: {}\r\n", self.cseq).as_str());
        headers.push_str(format!("Call-ID: {{{}}}\r\n", self.call_id).as_str());
        headers.push_str(format!("Max-Forwards: {}\r\n", self.max_forwards).as_str());
        headers.push_str(format!("Content-Type: {}\r\n", self.content_type).as_str());
        headers.push_str(format!("Content-Length: {}\r\n\r\n", body.len()).as_str());

        format!("{headers}{body}").into_bytes()
    }
}

/// Either side of an MSNSLP exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum SlpMessage {
    Request(SlpRequest),
    Response(SlpResponse),
}

struct SlpHeaders {
    to: String,
    from: String,
    branch: String,
    cseq: u32,
    call_id: String,
    max_forwards: u32,
    content_type: String,
}

fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}: ");
    headers
        .lines()
        .find(|line| line.starts_with(&prefix))
        .map(|line| &line[prefix.len()..])
}

fn parse_headers(headers: &str) -> Result<SlpHeaders, P2pError> {
    let to = header_value(headers, "To")
        .ok_or(P2pError::SlpParse)?
        .replace("<msnmsgr:", "")
        .replace(">", "");

    let from = header_value(headers, "From")
        .ok_or(P2pError::SlpParse)?
        .replace("<msnmsgr:", "")
        .replace(">", "");

    let branch = header_value(headers, "Via")
        .ok_or(P2pError::SlpParse)?
        .replace("MSNSLP/1.0/TLP ;branch={", "")
        .replace("}", "");

    let cseq = header_value(headers, "CSeq")
        .and_then(|value| value.parse().ok())
        .ok_or(P2pError::SlpParse)?;

    let call_id = header_value(headers, "Call-ID")
        .ok_or(P2pError::SlpParse)?
        .replace("{", "")
        .replace("}", "");

    let max_forwards = header_value(headers, "Max-Forwards")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);

    let content_type = header_value(headers, "Content-Type")
        .ok_or(P2pError::SlpParse)?
        .to_string();

    Ok(SlpHeaders {
        to,
        from,
        branch,
        cseq,
        call_id,
        max_forwards,
        content_type,
    })
}

impl SlpMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, P2pError> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_end_matches('\0');

        let (headers, body) = text.split_once("\r\n\r\n").ok_or(P2pError::SlpParse)?;
        let first_line = headers.lines().next().ok_or(P2pError::SlpParse)?;
        let parsed_headers = parse_headers(headers)?;
        let body = SlpBody::parse(body);

        if let Some(status_line) = first_line.strip_prefix("MSNSLP/1.0 ") {
            let (status_code, reason) = status_line.split_once(' ').ok_or(P2pError::SlpParse)?;
            let status_code = status_code.parse().or(Err(P2pError::SlpParse))?;

            return Ok(SlpMessage::Response(SlpResponse {
                status_code,
                reason: reason.to_string(),
                to: parsed_headers.to,
                from: parsed_headers.from,
                branch: parsed_headers.branch,
                cseq: parsed_headers.cseq,
                call_id: parsed_headers.call_id,
                max_forwards: parsed_headers.max_forwards,
                content_type: parsed_headers.content_type,
                body,
            }));
        }

        let mut first_line = first_line.split(' ');
        let method = first_line.next().ok_or(P2pError::SlpParse)?;
        let uri = first_line.next().ok_or(P2pError::SlpParse)?;

        Ok(SlpMessage::Request(SlpRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            to: parsed_headers.to,
            from: parsed_headers.from,
            branch: parsed_headers.branch,
            cseq: parsed_headers.cseq,
            call_id: parsed_headers.call_id,
            max_forwards: parsed_headers.max_forwards,
            content_type: parsed_headers.content_type,
            body,
        }))
    }
}
