use serde::de::DeserializeOwned;

/// Returns the first embedded JSON object that deserializes into `T`.
pub fn first_object<T: DeserializeOwned>(text: &str) -> Option<T> {
    text.char_indices()
        .filter(|(_, c)| *c == '{')
        .find_map(|(start, _)| {
            let mut stream =
                serde_json::Deserializer::from_str(&text[start..]).into_iter::<T>();
            match stream.next() {
                Some(Ok(value)) => Some(value),
                _ => None,
            }
        })
}
