use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, instrument};

use super::{CounterObject, CounterStore, StoreError, WriteCondition};

/// [`CounterStore`] backed by an S3 bucket.
#[derive(Clone)]
pub struct S3CounterStore {
    client: Client,
}

impl S3CounterStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl CounterStore for S3CounterStore {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        counter_exists(&self.client, bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<CounterObject, StoreError> {
        read_counter(&self.client, bucket, key).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        condition: WriteCondition,
    ) -> Result<(), StoreError> {
        write_counter(&self.client, bucket, key, body, condition).await
    }
}

// ---------------------------------------------------------------------------
// Free functions: operate on explicit bucket / key parameters.
// ---------------------------------------------------------------------------

/// Check for the counter object by listing under `key` as a prefix and
/// looking for an exact match.
///
/// Follows continuation tokens until a match turns up or the listing ends.
#[instrument(skip(client), fields(%bucket, %key))]
pub async fn counter_exists(client: &Client, bucket: &str, key: &str) -> Result<bool, StoreError> {
    let mut continuation_token: Option<String> = None;

    loop {
        let mut req = client.list_objects_v2().bucket(bucket).prefix(key);

        if let Some(ref token) = continuation_token {
            req = req.continuation_token(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|err| StoreError::request("ListObjectsV2", bucket, key, err))?;

        if resp.contents().iter().any(|obj| obj.key() == Some(key)) {
            debug!("counter object exists");
            return Ok(true);
        }

        match resp.next_continuation_token() {
            Some(token) => {
                continuation_token = Some(token.to_string());
            }
            None => break,
        }
    }

    debug!("counter object does not exist");
    Ok(false)
}

/// Download the counter object and its entity tag.
#[instrument(skip(client), fields(%bucket, %key))]
pub async fn read_counter(client: &Client, bucket: &str, key: &str) -> Result<CounterObject, StoreError> {
    let resp = match client.get_object().bucket(bucket).key(key).send().await {
        Ok(resp) => resp,
        Err(err) if is_missing_object(&err) => {
            debug!("counter object does not exist");
            return Err(StoreError::not_found(bucket, key));
        }
        Err(err) => return Err(StoreError::request("GetObject", bucket, key, err)),
    };

    let etag = resp.e_tag().map(str::to_owned);
    let body = resp
        .body
        .collect()
        .await
        .map_err(|err| StoreError::request("read GetObject body", bucket, key, err))?
        .into_bytes()
        .to_vec();

    debug!(bytes = body.len(), etag = ?etag, "counter object read");
    Ok(CounterObject { body, etag })
}

/// Upload the counter object, honouring `condition`.
#[instrument(skip(client, body), fields(%bucket, %key))]
pub async fn write_counter(
    client: &Client,
    bucket: &str,
    key: &str,
    body: Vec<u8>,
    condition: WriteCondition,
) -> Result<(), StoreError> {
    let len = body.len();
    let req = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type("text/plain");

    let req = match condition {
        WriteCondition::Unconditional => req,
        WriteCondition::IfAbsent => req.if_none_match("*"),
        WriteCondition::IfMatch(etag) => req.if_match(etag),
    };

    match req.send().await {
        Ok(_) => {
            debug!(bytes = len, "counter object written");
            Ok(())
        }
        Err(err) if is_precondition_rejection(&err) => {
            debug!("conditional write rejected");
            Err(StoreError::precondition_failed(bucket, key))
        }
        Err(err) => Err(StoreError::request("PutObject", bucket, key, err)),
    }
}

fn is_missing_object(err: &SdkError<GetObjectError, HttpResponse>) -> bool {
    err.as_service_error().is_some_and(|e| e.is_no_such_key())
}

/// S3 answers 412 when `If-Match`/`If-None-Match` does not hold and 409 when a
/// concurrent conditional write won the race.
fn is_precondition_rejection<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response()
        .map(|resp| resp.status().as_u16())
        .is_some_and(|status| status == 412 || status == 409)
}
