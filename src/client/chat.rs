// ABOUTME: Parses chat client input lines into actions
// ABOUTME: `@a,b text` multicasts, `/file path` sends a file, `/quit` leaves

use crate::protocol::messages::Recipients;
use std::path::PathBuf;

/// What a line typed into the chat client asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    /// Send a chat line
    Text {
        /// Addressees
        recipients: Recipients,
        /// Message text
        text: String,
    },
    /// Send a file
    File {
        /// Addressees
        recipients: Recipients,
        /// Local file to send
        path: PathBuf,
    },
    /// List known participants
    Who,
    /// Leave the meeting
    Quit,
    /// Nothing to do
    Empty,
}

/// Parse one input line
///
/// A leading `@name1,name2` token limits delivery to those names and may
/// precede plain text or a `/file` command.
pub fn parse_input(line: &str) -> ChatInput {
    let line = line.trim();
    if line.is_empty() {
        return ChatInput::Empty;
    }

    let (recipients, rest) = match line.strip_prefix('@') {
        Some(addressed) => {
            let (names, rest) = addressed.split_once(char::is_whitespace).unwrap_or((addressed, ""));
            let names = names.split(',').map(str::trim).filter(|n| !n.is_empty());
            (Recipients::from_names(names), rest.trim_start())
        }
        None => (Recipients::Everyone, line),
    };

    match rest {
        "/quit" => ChatInput::Quit,
        "/who" => ChatInput::Who,
        _ => {
            if let Some(path) = rest.strip_prefix("/file ") {
                let path = path.trim();
                if !path.is_empty() {
                    return ChatInput::File {
                        recipients,
                        path: PathBuf::from(path),
                    };
                }
            }
            if rest.is_empty() {
                ChatInput::Empty
            } else {
                ChatInput::Text {
                    recipients,
                    text: rest.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_broadcasts() {
        assert_eq!(
            parse_input("hello all"),
            ChatInput::Text {
                recipients: Recipients::Everyone,
                text: "hello all".to_string(),
            }
        );
    }

    #[test]
    fn test_addressed_text() {
        assert_eq!(
            parse_input("@bob,carol  see you"),
            ChatInput::Text {
                recipients: Recipients::from_names(["bob", "carol"]),
                text: "see you".to_string(),
            }
        );
    }

    #[test]
    fn test_addressed_file() {
        assert_eq!(
            parse_input("@bob /file notes/plan.txt"),
            ChatInput::File {
                recipients: Recipients::from_names(["bob"]),
                path: PathBuf::from("notes/plan.txt"),
            }
        );
    }

    #[test]
    fn test_commands_and_blank_lines() {
        assert_eq!(parse_input("/quit"), ChatInput::Quit);
        assert_eq!(parse_input("/who"), ChatInput::Who);
        assert_eq!(parse_input("   "), ChatInput::Empty);
        assert_eq!(parse_input("@bob"), ChatInput::Empty);
    }

    #[test]
    fn test_file_without_path_is_text() {
        assert_eq!(
            parse_input("/file "),
            ChatInput::Text {
                recipients: Recipients::Everyone,
                text: "/file".to_string(),
            }
        );
    }
}
