use crate::remote::NamedFolder;

/// Locates a special-use folder by name when the server does not advertise
/// one. Exact candidates are tried in order against the folder name and path,
/// then case-insensitive substring tokens.
#[derive(Debug, Clone)]
pub struct FolderMatcher {
    exact: Vec<String>,
    tokens: Vec<String>,
}

impl FolderMatcher {
    pub fn new<E, T>(exact: E, tokens: T) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            exact: exact.into_iter().map(Into::into).collect(),
            tokens: tokens
                .into_iter()
                .map(|t| t.into().to_lowercase())
                .collect(),
        }
    }

    pub fn sent() -> Self {
        Self::new(
            ["Sent", "Wysłane", "Elementy wysłane", "Sent Items", "Sent Messages"],
            ["sent", "wysłane"],
        )
    }

    pub fn trash() -> Self {
        Self::new(
            [
                "Trash",
                "Bin",
                "Kosz",
                "Elementy usunięte",
                "Deleted Items",
                "Deleted",
                "Papierkorb",
                "Corbeille",
                "Itens Excluídos",
            ],
            ["trash", "bin", "kosz"],
        )
    }

    pub fn find<'a, F: NamedFolder>(&self, folders: &'a [F]) -> Option<&'a F> {
        for candidate in &self.exact {
            let candidate = candidate.as_str();
            if let Some(found) = folders
                .iter()
                .find(|f| f.folder_name() == candidate || f.folder_path() == candidate)
            {
                return Some(found);
            }
        }
        for token in &self.tokens {
            if let Some(found) = folders.iter().find(|f| {
                f.folder_name().to_lowercase().contains(token)
                    || f.folder_path().to_lowercase().contains(token)
            }) {
                return Some(found);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::FolderMatcher;
    use crate::remote::RemoteFolder;

    fn folder(path: &str, name: &str) -> RemoteFolder {
        RemoteFolder {
            path: path.to_string(),
            name: name.to_string(),
            delimiter: Some("/".to_string()),
        }
    }

    #[test]
    fn exact_candidates_win_in_order_over_tokens() {
        let folders = vec![
            folder("INBOX/Old sent stuff", "Old sent stuff"),
            folder("Sent Items", "Sent Items"),
            folder("INBOX/Sent", "Sent"),
        ];
        let found = FolderMatcher::sent().find(&folders);
        assert_eq!(found.map(|f| f.path.as_str()), Some("INBOX/Sent"));
    }

    #[test]
    fn matches_decoded_name_or_raw_path() {
        let folders = vec![folder("INBOX", "INBOX"), folder("Kosz", "Kosz")];
        assert_eq!(
            FolderMatcher::trash().find(&folders).map(|f| f.path.as_str()),
            Some("Kosz")
        );

        let folders = vec![folder("INBOX/Wys&AUI-ane", "Wysłane")];
        assert_eq!(
            FolderMatcher::sent().find(&folders).map(|f| f.path.as_str()),
            Some("INBOX/Wys&AUI-ane")
        );
    }

    #[test]
    fn falls_back_to_case_insensitive_tokens() {
        let folders = vec![folder("INBOX", "INBOX"), folder("[Gmail]/BIN old", "BIN old")];
        assert_eq!(
            FolderMatcher::trash().find(&folders).map(|f| f.name.as_str()),
            Some("BIN old")
        );
        assert!(FolderMatcher::sent().find(&folders).is_none());
    }
}
