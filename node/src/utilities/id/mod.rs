use uuid::Uuid;

pub(crate) type RequestId = String;

pub(crate) fn generate_request_id() -> RequestId {
    Uuid::new_v4().to_string()
}
