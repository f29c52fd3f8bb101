//! Minimal SIP wire format: requests out, responses in

use bytes::{BufMut, Bytes, BytesMut};
use sip_egress_lib::{Headers, SipRequest, SipResponse, TransportError};
use std::net::SocketAddr;

const SIP_VERSION: &str = "SIP/2.0";
/// RFC 3261 magic cookie of branch parameters
const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Push our Via on top of the request and return the branch identifying the client transaction
pub(crate) fn push_via(request: &mut SipRequest, local: SocketAddr) -> String {
  let branch = format!("{BRANCH_MAGIC_COOKIE}{}", sip_egress_lib::random_token());
  let sent_by = match local {
    SocketAddr::V4(v4) => v4.to_string(),
    SocketAddr::V6(v6) => format!("[{}]:{}", v6.ip(), v6.port()),
  };
  let mut headers = Headers::new();
  headers.push("Via", format!("{SIP_VERSION}/UDP {sent_by};branch={branch};rport"));
  for (name, value) in request.headers.iter() {
    headers.push(name, value);
  }
  request.headers = headers;
  branch
}

/// Serialize a request, with a Content-Length matching the body
pub(crate) fn encode_request(request: &SipRequest) -> Bytes {
  let mut buf = BytesMut::with_capacity(512 + request.body.len());
  buf.put_slice(format!("{} {} {SIP_VERSION}\r\n", request.method, request.uri).as_bytes());
  for (name, value) in request.headers.iter() {
    if name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("l") {
      continue;
    }
    buf.put_slice(format!("{name}: {value}\r\n").as_bytes());
  }
  buf.put_slice(format!("Content-Length: {}\r\n\r\n", request.body.len()).as_bytes());
  buf.put_slice(&request.body);
  buf.freeze()
}

/// Parse a datagram carrying a response
pub(crate) fn decode_response(datagram: &[u8]) -> Result<SipResponse, TransportError> {
  let invalid = |reason: &str| TransportError::InvalidResponse(reason.to_string());

  let head_end = find_subsequence(datagram, b"\r\n\r\n").ok_or_else(|| invalid("no end of headers"))?;
  let head = std::str::from_utf8(&datagram[..head_end]).map_err(|_| invalid("headers are not UTF-8"))?;
  let body = &datagram[head_end + 4..];

  let mut lines = head.split("\r\n");
  let status_line = lines.next().ok_or_else(|| invalid("empty message"))?;
  let mut parts = status_line.splitn(3, ' ');
  if parts.next() != Some(SIP_VERSION) {
    return Err(invalid("not a SIP/2.0 response"));
  }
  let status = parts
    .next()
    .and_then(|s| s.parse::<u16>().ok())
    .filter(|s| (100..700).contains(s))
    .ok_or_else(|| invalid("bad status code"))?;
  let reason = parts.next().unwrap_or_default().to_string();

  let mut headers = Headers::new();
  let mut current: Option<(String, String)> = None;
  for line in lines {
    // header folding
    if line.starts_with([' ', '\t']) {
      if let Some((_, value)) = current.as_mut() {
        value.push(' ');
        value.push_str(line.trim());
      }
      continue;
    }
    if let Some((name, value)) = current.take() {
      headers.push(name, value);
    }
    let (name, value) = line.split_once(':').ok_or_else(|| invalid("malformed header line"))?;
    current = Some((name.trim().to_string(), value.trim().to_string()));
  }
  if let Some((name, value)) = current {
    headers.push(name, value);
  }

  let body = match headers.get("Content-Length").map(|v| v.trim().parse::<usize>()) {
    Some(Ok(len)) if len <= body.len() => Bytes::copy_from_slice(&body[..len]),
    Some(Ok(_)) => return Err(invalid("truncated body")),
    Some(Err(_)) => return Err(invalid("bad Content-Length")),
    None => Bytes::copy_from_slice(body),
  };

  Ok(SipResponse {
    status,
    reason,
    headers,
    body,
  })
}

/// ACK of a non-2xx final response to an INVITE, sent within the same client transaction
pub(crate) fn ack_for(invite: &SipRequest, response: &SipResponse) -> SipRequest {
  let mut ack = SipRequest::new("ACK", invite.uri.clone());
  if let Some(via) = invite.headers.get("Via") {
    ack.headers.push("Via", via);
  }
  for name in ["From", "Call-ID"] {
    if let Some(value) = invite.headers.get(name) {
      ack.headers.push(name, value);
    }
  }
  if let Some(to) = response.headers.get("To").or_else(|| invite.headers.get("To")) {
    ack.headers.push("To", to);
  }
  let seq = invite
    .cseq()
    .and_then(|c| c.split_whitespace().next())
    .unwrap_or("1");
  ack.headers.push("CSeq", format!("{seq} ACK"));
  ack.headers.push("Max-Forwards", "70");
  ack
}

/// Value of the branch parameter of the top Via
pub(crate) fn top_via_branch(headers: &Headers) -> Option<&str> {
  headers
    .get("Via")?
    .split(';')
    .skip(1)
    .filter_map(|p| p.split_once('='))
    .find(|(k, _)| k.trim().eq_ignore_ascii_case("branch"))
    .map(|(_, v)| v.trim())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encode_request_with_via() {
    let mut request = SipRequest::options("sip:192.0.2.1:5070".parse().unwrap(), 70);
    let branch = push_via(&mut request, "198.51.100.1:40000".parse().unwrap());
    assert!(branch.starts_with(BRANCH_MAGIC_COOKIE));
    assert_eq!(top_via_branch(&request.headers), Some(branch.as_str()));

    let encoded = encode_request(&request);
    let text = std::str::from_utf8(&encoded).unwrap();
    assert!(text.starts_with("OPTIONS sip:192.0.2.1:5070 SIP/2.0\r\nVia: SIP/2.0/UDP 198.51.100.1:40000;branch="));
    assert!(text.contains("\r\nMax-Forwards: 70\r\n"));
    assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
  }

  #[test]
  fn test_decode_response() {
    let datagram = b"SIP/2.0 302 Moved Temporarily\r\n\
      Via: SIP/2.0/UDP 198.51.100.1:40000;branch=z9hG4bKabc;rport=40000\r\n\
      i: call-1@example.com\r\n\
      CSeq: 1 INVITE\r\n\
      Contact: <sip:alice@192.0.2.11>;q=0.5,\r\n <sip:alice@192.0.2.12>;q=0.9\r\n\
      Content-Length: 4\r\n\r\nabcdXX";
    let response = decode_response(datagram).unwrap();
    assert_eq!(response.status, 302);
    assert_eq!(response.reason, "Moved Temporarily");
    assert_eq!(response.call_id(), Some("call-1@example.com"));
    assert_eq!(response.contacts().len(), 2);
    assert_eq!(&response.body[..], b"abcd");
    assert_eq!(top_via_branch(&response.headers), Some("z9hG4bKabc"));
  }

  #[test]
  fn test_ack_for_rejected_invite() {
    let mut invite = SipRequest::new("INVITE", "sip:bob@192.0.2.1".parse().unwrap());
    invite.headers.push("From", "<sip:alice@example.com>;tag=1");
    invite.headers.push("To", "<sip:bob@example.com>");
    invite.headers.push("Call-ID", "call-1@example.com");
    invite.headers.push("CSeq", "42 INVITE");
    push_via(&mut invite, "198.51.100.1:40000".parse().unwrap());
    let mut response = SipResponse::for_request(486, &invite);
    response.headers.insert("To", "<sip:bob@example.com>;tag=2");

    let ack = ack_for(&invite, &response);
    assert_eq!(ack.method, "ACK");
    assert_eq!(ack.cseq(), Some("42 ACK"));
    assert_eq!(ack.headers.get("To"), Some("<sip:bob@example.com>;tag=2"));
    assert_eq!(top_via_branch(&ack.headers), top_via_branch(&invite.headers));
  }

  #[test]
  fn test_decode_rejects_garbage() {
    assert!(decode_response(b"INVITE sip:a@b SIP/2.0\r\n\r\n").is_err());
    assert!(decode_response(b"SIP/2.0 99 Nope\r\n\r\n").is_err());
    assert!(decode_response(b"SIP/2.0 200 OK\r\nCSeq 1 OPTIONS\r\n\r\n").is_err());
    assert!(decode_response(b"SIP/2.0 200 OK\r\nContent-Length: 10\r\n\r\nabc").is_err());
  }
}
