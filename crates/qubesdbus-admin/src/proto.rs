//! Request framing and response parsing for the qubesd admin protocol.
//!
//! A call is a single header line terminated by NUL, followed by the raw
//! payload and a half-close. The response is read to EOF and starts with a
//! two-byte status: `0\0` for success, `2\0` for a serialized exception.

use crate::AdminError;
use qubesdbus_model::PropertyValue;

/// Encode a request header plus payload.
///
/// The header is `"{method}+{arg} dom0 name {dest}\0"`; an empty `arg`
/// keeps the `+` separator.
pub fn encode_request(method: &str, dest: &str, arg: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!("{method}+{arg} dom0 name {dest}\0");
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split a complete response into the success payload, or decode the
/// serialized exception.
pub fn parse_response(data: &[u8]) -> Result<Vec<u8>, AdminError> {
    match data {
        [b'0', 0, rest @ ..] => Ok(rest.to_vec()),
        [b'2', 0, rest @ ..] => Err(parse_exception(rest)),
        [] => Err(AdminError::Malformed("empty response".to_owned())),
        other => Err(AdminError::Malformed(format!(
            "unknown response status {:?}",
            &other[..other.len().min(2)]
        ))),
    }
}

/// Exception body: `TYPE\0TRACEBACK\0FORMAT\0ARG1\0ARG2...`. The format
/// string's `%s` placeholders are substituted with the args.
fn parse_exception(body: &[u8]) -> AdminError {
    let mut fields = body.splitn(3, |b| *b == 0);
    let kind = fields
        .next()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .unwrap_or_default();
    let _traceback = fields.next();
    let rest = fields.next().unwrap_or_default();

    let mut parts = rest.split(|b| *b == 0);
    let format = parts
        .next()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .unwrap_or_default();
    let args: Vec<String> = parts
        .filter(|p| !p.is_empty())
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect();

    AdminError::Remote {
        kind,
        message: expand_format(&format, &args),
    }
}

fn expand_format(format: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut rest = format;
    while let Some(pos) = rest.find("%s") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(arg),
            None => out.push_str("%s"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// One line of an `admin.vm.List` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainListing {
    pub name: String,
    pub klass: String,
    pub power_state: String,
}

/// Parse an `admin.vm.List` payload: `NAME class=CLASS state=STATE\n` per
/// domain. Lines missing a field are skipped.
pub fn parse_domain_list(payload: &[u8]) -> Vec<DomainListing> {
    String::from_utf8_lossy(payload)
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let mut klass = None;
            let mut state = None;
            for field in fields {
                if let Some(v) = field.strip_prefix("class=") {
                    klass = Some(v);
                } else if let Some(v) = field.strip_prefix("state=") {
                    state = Some(v);
                }
            }
            Some(DomainListing {
                name: name.to_owned(),
                klass: klass?.to_owned(),
                power_state: state?.to_owned(),
            })
        })
        .collect()
}

/// Parse an `admin.vm.property.Get` payload:
/// `default={True|False} type=TYPE VALUE` where VALUE may be empty or
/// contain spaces.
pub fn parse_property_get(payload: &[u8]) -> Result<PropertyValue, AdminError> {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim_end_matches('\n');

    let rest = text
        .strip_prefix("default=True ")
        .or_else(|| text.strip_prefix("default=False "))
        .ok_or_else(|| AdminError::Malformed(format!("bad property payload: {text:?}")))?;
    let rest = rest
        .strip_prefix("type=")
        .ok_or_else(|| AdminError::Malformed(format!("bad property payload: {text:?}")))?;
    let (kind, value) = rest.split_once(' ').unwrap_or((rest, ""));

    Ok(PropertyValue::from_admin(kind, value))
}

/// Parse an `admin.vm.CurrentState` payload: space-separated `key=value`
/// pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentState {
    pub mem: Option<u64>,
    pub mem_static_max: Option<u64>,
    pub power_state: Option<String>,
}

pub fn parse_current_state(payload: &[u8]) -> CurrentState {
    let mut out = CurrentState::default();
    for pair in String::from_utf8_lossy(payload).split_whitespace() {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "mem" => out.mem = value.parse().ok(),
            "mem_static_max" => out.mem_static_max = value.parse().ok(),
            "power_state" => out.power_state = Some(value.to_owned()),
            _ => {}
        }
    }
    out
}

/// Parse a name-per-line payload (`admin.label.List`,
/// `admin.vm.property.List`).
pub fn parse_name_list(payload: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_layout() {
        assert_eq!(
            encode_request("admin.vm.List", "dom0", "", b""),
            b"admin.vm.List+ dom0 name dom0\0"
        );
        assert_eq!(
            encode_request("admin.vm.property.Get", "work", "netvm", b""),
            b"admin.vm.property.Get+netvm dom0 name work\0"
        );
    }

    #[test]
    fn request_appends_payload() {
        let req = encode_request("admin.vm.Start", "work", "", b"xyz");
        assert!(req.ends_with(b"\0xyz"));
    }

    #[test]
    fn ok_response() {
        assert_eq!(parse_response(b"0\0hello").unwrap(), b"hello");
        assert_eq!(parse_response(b"0\0").unwrap(), b"");
    }

    #[test]
    fn exception_response() {
        let resp = b"2\0QubesVMNotFoundError\0\0No such domain: %s\0work\0";
        let err = parse_response(resp).unwrap_err();
        match err {
            AdminError::Remote { kind, message } => {
                assert_eq!(kind, "QubesVMNotFoundError");
                assert_eq!(message, "No such domain: work");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn exception_without_args() {
        let resp = b"2\0PermissionDenied\0\0not allowed\0";
        let err = parse_response(resp).unwrap_err();
        assert!(matches!(
            err,
            AdminError::Remote { kind, message }
                if kind == "PermissionDenied" && message == "not allowed"
        ));
    }

    #[test]
    fn garbage_response_is_malformed() {
        assert!(matches!(
            parse_response(b"x\0whatever"),
            Err(AdminError::Malformed(_))
        ));
        assert!(matches!(parse_response(b""), Err(AdminError::Malformed(_))));
    }

    #[test]
    fn domain_list_lines() {
        let payload = b"dom0 class=AdminVM state=Running\nwork class=AppVM state=Halted\n";
        let listings = parse_domain_list(payload);
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].name, "dom0");
        assert_eq!(listings[1].klass, "AppVM");
        assert_eq!(listings[1].power_state, "Halted");
    }

    #[test]
    fn domain_list_skips_malformed_lines() {
        let payload = b"broken-line\nok class=AppVM state=Running\n";
        let listings = parse_domain_list(payload);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "ok");
    }

    #[test]
    fn property_get_variants() {
        assert_eq!(
            parse_property_get(b"default=False type=vm sys-net").unwrap(),
            PropertyValue::Vm("sys-net".to_owned())
        );
        assert_eq!(
            parse_property_get(b"default=True type=int 4096").unwrap(),
            PropertyValue::Int(4096)
        );
        assert_eq!(
            parse_property_get(b"default=True type=str ").unwrap(),
            PropertyValue::Absent
        );
        // values may contain spaces and '='
        assert_eq!(
            parse_property_get(b"default=False type=str a=b c").unwrap(),
            PropertyValue::Str("a=b c".to_owned())
        );
    }

    #[test]
    fn property_get_rejects_garbage() {
        assert!(parse_property_get(b"nonsense").is_err());
        assert!(parse_property_get(b"default=Maybe type=str x").is_err());
    }

    #[test]
    fn current_state_pairs() {
        let state = parse_current_state(b"mem=422112 mem_static_max=4096000 power_state=Running");
        assert_eq!(state.mem, Some(422_112));
        assert_eq!(state.mem_static_max, Some(4_096_000));
        assert_eq!(state.power_state.as_deref(), Some("Running"));
    }

    #[test]
    fn current_state_tolerates_unknown_keys() {
        let state = parse_current_state(b"cputime=99 power_state=Halted");
        assert_eq!(state.mem, None);
        assert_eq!(state.power_state.as_deref(), Some("Halted"));
    }

    #[test]
    fn name_list() {
        assert_eq!(
            parse_name_list(b"red\nblue\n\ngreen\n"),
            vec!["red", "blue", "green"]
        );
        assert!(parse_name_list(b"").is_empty());
    }

    #[test]
    fn format_expansion() {
        assert_eq!(
            expand_format("got %s and %s", &["a".to_owned(), "b".to_owned()]),
            "got a and b"
        );
        // too few args leaves the placeholder visible
        assert_eq!(expand_format("%s %s", &["x".to_owned()]), "x %s");
    }
}
