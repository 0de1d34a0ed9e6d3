// Source Loader - local CSV files and S3 objects
//
// Fetches raw bytes from the configured source and hands them to the parser.
// S3 requests are signed with AWS Signature Version 4 over plain HTTPS.

use std::fmt;
use std::fs::File;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::info;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::parser::{parse_csv, TransactionTable};

type HmacSha256 = Hmac<Sha256>;

const S3_SERVICE: &str = "s3";
const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SOURCE DESCRIPTORS
// ============================================================================

/// An object stored in S3 plus the credentials to read it
#[derive(Clone, Default, PartialEq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

// Keep credentials out of logs
impl fmt::Debug for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Location")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Location {
    pub fn host(&self) -> String {
        format!("{}.s3.{}.amazonaws.com", self.bucket, self.region)
    }

    /// Object path with every key segment percent-encoded
    pub fn canonical_uri(&self) -> String {
        let encoded: Vec<String> = self
            .key
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("/{}", encoded.join("/"))
    }

    pub fn url(&self) -> String {
        format!("https://{}{}", self.host(), self.canonical_uri())
    }
}

impl fmt::Display for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Where a run reads its transactions from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDescriptor {
    Local(PathBuf),
    S3(S3Location),
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Local(path) => write!(f, "{}", path.display()),
            SourceDescriptor::S3(location) => write!(f, "{}", location),
        }
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Read and normalize the transactions behind `source`.
pub fn load(source: &SourceDescriptor) -> Result<TransactionTable> {
    info!("Reading csv file...");
    let origin = source.to_string();

    match source {
        SourceDescriptor::Local(path) => {
            info!("Getting the csv locally: {}", origin);
            let file = File::open(path).map_err(|e| Error::source_unavailable(&origin, e))?;
            parse_csv(file, &origin)
        }
        SourceDescriptor::S3(location) => {
            info!("Getting the csv from S3: {}/{}", location.bucket, location.key);
            let body = fetch_s3_object(location)?;
            parse_csv(Cursor::new(body), &origin)
        }
    }
}

/// GET an object from S3.
pub fn fetch_s3_object(location: &S3Location) -> Result<Vec<u8>> {
    let origin = location.to_string();

    if location.bucket.is_empty() || location.key.is_empty() || location.region.is_empty() {
        return Err(Error::Config(format!(
            "S3 source needs bucket, key and region (got {:?})",
            location
        )));
    }

    let signed = sign_get_request(location, Utc::now());

    let client = reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::source_unavailable(&origin, e))?;

    let response = client
        .get(location.url())
        .header("host", location.host())
        .header("x-amz-date", &signed.amz_date)
        .header("x-amz-content-sha256", &signed.payload_hash)
        .header("authorization", &signed.authorization)
        .send()
        .map_err(|e| Error::source_unavailable(&origin, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(Error::source_unavailable(
            &origin,
            format!("S3 returned {}: {}", status, body),
        ));
    }

    let bytes = response
        .bytes()
        .map_err(|e| Error::source_unavailable(&origin, e))?;

    Ok(bytes.to_vec())
}

// ============================================================================
// SIGNATURE VERSION 4
// ============================================================================

/// Headers that authenticate one GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub amz_date: String,
    pub payload_hash: String,
    pub authorization: String,
}

/// Sign an empty-body GET for `location` at time `now`.
pub fn sign_get_request(location: &S3Location, now: DateTime<Utc>) -> SignedHeaders {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(b"");

    let signed_header_names = "host;x-amz-content-sha256;x-amz-date";
    let canonical_request = format!(
        "GET\n{}\n\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
        location.canonical_uri(),
        location.host(),
        payload_hash,
        amz_date,
        signed_header_names,
        payload_hash,
    );

    let scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, location.region, S3_SERVICE
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        SIGNING_ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes()),
    );

    let key = signing_key(
        &location.secret_access_key,
        &date_stamp,
        &location.region,
        S3_SERVICE,
    );
    let signature = format!("{:x}", hmac_sha256(&key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        SIGNING_ALGORITHM, location.access_key_id, scope, signed_header_names, signature
    );

    SignedHeaders {
        amz_date,
        payload_hash,
        authorization,
    }
}

/// Derive the per-day, per-region, per-service signing key.
pub fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Digest32 {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

type Digest32 = hmac::digest::Output<Sha256>;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Digest32 {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes()
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

// ============================================================================
// TESTS
// ============================================================================
