//! The two places the proxy looks inside otherwise opaque chat-completion JSON.

use serde_json::Value;

/// `url` of the first `image_url` part found in `messages[*].content[*]`.
pub fn first_image_url(request: &Value) -> Option<&str> {
    request
        .get("messages")?
        .as_array()?
        .iter()
        .filter_map(|message| message.get("content")?.as_array())
        .flatten()
        .find(|part| part.get("type").and_then(Value::as_str) == Some("image_url"))
        .and_then(|part| part.get("image_url")?.get("url")?.as_str())
}

/// `choices[0].message.content` of a backend response.
pub fn answer_text(response: &Value) -> Option<&str> {
    response
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}
