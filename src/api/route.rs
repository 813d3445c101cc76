/// Path segments whose following id selects a separate rate limit bucket
static MAJOR_PARAMETERS: &[&str] = &["channels", "guilds", "webhooks"];

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Resource class of an endpoint, used as rate limit bucket key.
///
/// Ids after a major parameter are kept, every other id is replaced by `:id`,
/// so `/channels/1/messages/2` and `/channels/1/messages/3` share a bucket but
/// `/channels/2/messages/2` does not.
pub(crate) fn bucket_key(endpoint: &str) -> String {
    let path = endpoint.split(&['?', '#'][..]).next().unwrap_or_default();

    let mut key = Vec::new();
    let mut previous = "";

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if is_id(segment) && !MAJOR_PARAMETERS.iter().any(|major| *major == previous) {
            key.push(":id");
        } else {
            key.push(segment);
        }
        previous = segment;
    }

    key.join("/")
}
