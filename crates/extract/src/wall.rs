use core_model::WallState;

// Classifies visible notice text via a (phrase, state) table, matched as
// lowercased substrings so new phrasings and locales are additive data.
// Device-bound patterns are checked before transient-sync ones: when both
// banners are visible, the device-bound wall is the one that cannot
// self-resolve.
#[derive(Debug, Clone)]
pub struct WallClassifier {
    patterns: Vec<(String, WallState)>,
}

impl Default for WallClassifier {
    fn default() -> Self {
        let mut classifier = WallClassifier {
            patterns: Vec::new(),
        };
        for phrase in [
            "use your phone to see older messages",
            "open the app on your phone",
            "messages are only available on your phone",
            "usa tu teléfono para ver mensajes anteriores",
            "use seu telefone para ver mensagens antigas",
            "verwende dein telefon",
            "utilisez votre téléphone",
        ] {
            classifier.push_pattern(phrase, WallState::PhoneRequired);
        }
        for phrase in [
            "syncing older messages",
            "getting your messages",
            "this may take a while",
            "click to see progress",
            "sincronizando mensajes",
            "sincronizando mensagens antigas",
            "nachrichten werden synchronisiert",
            "synchronisation des messages",
        ] {
            classifier.push_pattern(phrase, WallState::GloballySyncing);
        }
        classifier
    }
}

impl WallClassifier {
    pub fn empty() -> Self {
        WallClassifier {
            patterns: Vec::new(),
        }
    }

    pub fn push_pattern(&mut self, phrase: &str, state: WallState) {
        self.patterns.push((phrase.to_lowercase(), state));
    }

    pub fn classify(&self, notices: &[String]) -> WallState {
        let lowered: Vec<String> = notices.iter().map(|n| n.to_lowercase()).collect();
        for wanted in [WallState::PhoneRequired, WallState::GloballySyncing] {
            for (phrase, state) in &self.patterns {
                if *state == wanted && lowered.iter().any(|n| n.contains(phrase)) {
                    return wanted;
                }
            }
        }
        WallState::Clear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notices(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn clear_on_no_notices() {
        let classifier = WallClassifier::default();
        assert_eq!(classifier.classify(&[]), WallState::Clear);
        assert_eq!(
            classifier.classify(&notices(&["3 unread conversations"])),
            WallState::Clear
        );
    }

    #[test]
    fn phone_required_detected() {
        let classifier = WallClassifier::default();
        assert_eq!(
            classifier.classify(&notices(&[
                "Use your phone to see older messages in this chat"
            ])),
            WallState::PhoneRequired
        );
    }

    #[test]
    fn syncing_detected_case_insensitive() {
        let classifier = WallClassifier::default();
        assert_eq!(
            classifier.classify(&notices(&["SYNCING OLDER MESSAGES — this may take a while"])),
            WallState::GloballySyncing
        );
    }

    #[test]
    fn other_locales_detected() {
        let classifier = WallClassifier::default();
        assert_eq!(
            classifier.classify(&notices(&["Usa tu teléfono para ver mensajes anteriores"])),
            WallState::PhoneRequired
        );
        assert_eq!(
            classifier.classify(&notices(&["Sincronizando mensagens antigas"])),
            WallState::GloballySyncing
        );
    }

    #[test]
    fn phone_required_wins_over_syncing() {
        let classifier = WallClassifier::default();
        assert_eq!(
            classifier.classify(&notices(&[
                "Getting your messages",
                "Use your phone to see older messages",
            ])),
            WallState::PhoneRequired
        );
    }

    #[test]
    fn patterns_are_additive() {
        let mut classifier = WallClassifier::empty();
        assert_eq!(
            classifier.classify(&notices(&["histori lama disinkronkan"])),
            WallState::Clear
        );
        classifier.push_pattern("disinkronkan", WallState::GloballySyncing);
        assert_eq!(
            classifier.classify(&notices(&["histori lama disinkronkan"])),
            WallState::GloballySyncing
        );
    }
}
