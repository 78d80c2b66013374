//! AWS Signature Version 4 request signing, for the Bedrock Converse
//! adapter's access/secret credential family (§4.3 "bedrock family rank").
//!
//! Scoped to exactly what a single JSON POST to `bedrock-runtime` needs:
//! no query-string signing, no chunked payload signing, no session tokens.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub(crate) struct SignedRequest {
    pub headers: Vec<(String, String)>,
}

/// Signs a `POST {path}` request to `{service}.{region}.amazonaws.com` with
/// a JSON `body`, returning the headers to attach (`Authorization`,
/// `X-Amz-Date`, `Host`).
#[allow(clippy::too_many_arguments)]
pub(crate) fn sign(
    access_key: &str,
    secret_key: &str,
    region: &str,
    service: &str,
    host: &str,
    path: &str,
    body: &[u8],
    timestamp: chrono::DateTime<chrono::Utc>,
) -> SignedRequest {
    let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = timestamp.format("%Y%m%d").to_string();

    let payload_hash = hex::encode(Sha256::digest(body));
    let canonical_headers = format!(
        "content-type:application/json\nhost:{host}\nx-amz-date:{amz_date}\n"
    );
    let signed_headers = "content-type;host;x-amz-date";
    let canonical_request = format!(
        "POST\n{path}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );
    let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));

    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let string_to_sign =
        format!("AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{canonical_request_hash}");

    let signing_key = derive_signing_key(secret_key, &date_stamp, region, service);
    let signature = hex::encode(hmac(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}"
    );

    SignedRequest {
        headers: vec![
            ("Authorization".into(), authorization),
            ("X-Amz-Date".into(), amz_date),
            ("Host".into(), host.to_string()),
        ],
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn signature_is_deterministic_for_fixed_inputs() {
        let ts = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = sign(
            "AKIDEXAMPLE",
            "secret",
            "us-east-1",
            "bedrock",
            "bedrock-runtime.us-east-1.amazonaws.com",
            "/model/foo/converse",
            b"{}",
            ts,
        );
        let b = sign(
            "AKIDEXAMPLE",
            "secret",
            "us-east-1",
            "bedrock",
            "bedrock-runtime.us-east-1.amazonaws.com",
            "/model/foo/converse",
            b"{}",
            ts,
        );
        assert_eq!(a.headers, b.headers);
        let auth = &a.headers[0].1;
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/us-east-1/bedrock/aws4_request"));
    }

    #[test]
    fn signature_changes_with_body() {
        let ts = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = sign(
            "AKID", "secret", "us-east-1", "bedrock", "host", "/path", b"{}", ts,
        );
        let b = sign(
            "AKID", "secret", "us-east-1", "bedrock", "host", "/path", b"{\"a\":1}", ts,
        );
        assert_ne!(a.headers[0].1, b.headers[0].1);
    }
}
