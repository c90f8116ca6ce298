/// Make a user name safe to embed in a file name: anything other than ASCII
/// alphanumerics, '-' and '_' becomes '_', so separators and ".." never
/// reach the path.
pub(crate) fn sanitize_file_stem(user: &str) -> String {
    user.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
