//! Path template matching for `paths` keys like `/pet/{petId}`.

/// Matches `path` against `template`, returning the captured parameters.
pub fn match_template(template: &str, path: &str) -> Option<Vec<(String, String)>> {
    let mut template_segments = template.trim_end_matches('/').split('/');
    let mut path_segments = path.trim_end_matches('/').split('/');
    let mut params = Vec::new();
    loop {
        match (template_segments.next(), path_segments.next()) {
            (None, None) => return Some(params),
            (Some(t), Some(p)) => {
                if let Some(name) = t.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
                    if p.is_empty() {
                        return None;
                    }
                    let value = urlencoding::decode(p).map(|v| v.into_owned()).unwrap_or_else(|_| p.to_string());
                    params.push((name.to_string(), value));
                } else if t != p {
                    return None;
                }
            }
            _ => return None,
        }
    }
}

/// Picks the best matching template: literal segments beat parameters.
pub fn find<'a, I>(templates: I, path: &str) -> Option<(&'a str, Vec<(String, String)>)>
where
    I: IntoIterator<Item = &'a str>,
{
    templates
        .into_iter()
        .filter_map(|t| match_template(t, path).map(|params| (t, params)))
        .min_by_key(|(_, params)| params.len())
}

/// Decodes `a=1&b=x%20y` into pairs.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| {
                let s = s.replace('+', " ");
                urlencoding::decode(&s).map(|v| v.into_owned()).unwrap_or(s)
            };
            (decode(k), decode(v))
        })
        .collect()
}
