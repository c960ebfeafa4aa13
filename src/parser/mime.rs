//! MIME traversal: turn a raw message into a single-pass sequence of leaf parts.
//!
//! The message is parsed once with `mail-parser`; [`Parts`] then walks the
//! part tree depth-first, top to bottom. `None` from the iterator means the
//! tree is exhausted, while `Some(Err(_))` reports one broken section and
//! leaves its siblings reachable.

use std::collections::BTreeMap;

use mail_parser::{HeaderName, Message, MessageParser, MessagePartId, MimeHeaders, PartType};

use crate::error::{Error, Result};
use crate::model::attachment::MimePart;
use crate::model::message::MessageId;

/// Maximum multipart nesting depth (to bound work on adversarial input).
pub const MAX_DEPTH: usize = 32;

/// A message body parsed as a MIME entity.
pub struct MimeEntity<'x> {
    message: Message<'x>,
}

impl<'x> MimeEntity<'x> {
    /// Parse a complete raw message (headers + body).
    ///
    /// Fails only when the input cannot be read as a MIME entity at all:
    /// empty input, or a header-less body that does not decode. Problems
    /// inside individual sections surface later from [`Parts`].
    pub fn parse(id: MessageId, raw: &'x [u8]) -> Result<Self> {
        let not_mime = || Error::MessageParse {
            id,
            reason: "not a MIME entity".into(),
        };
        let message = MessageParser::default().parse(raw).ok_or_else(not_mime)?;

        let readable = message
            .part(0)
            .is_some_and(|root| !(root.headers.is_empty() && root.is_encoding_problem));
        if !readable {
            return Err(not_mime());
        }
        Ok(Self { message })
    }

    /// Whether the top-level entity is a multipart container.
    pub fn is_multipart(&self) -> bool {
        self.message
            .part(0)
            .is_some_and(|root| matches!(root.body, PartType::Multipart(_)))
    }

    /// Leaf parts in top-to-bottom order.
    pub fn parts(&self) -> Parts<'_, 'x> {
        let stack = if self.message.parts.is_empty() {
            Vec::new()
        } else {
            vec![(0, 0)]
        };
        Parts {
            message: &self.message,
            stack,
            index: 0,
        }
    }
}

/// Depth-first iterator over the leaves of a [`MimeEntity`].
pub struct Parts<'m, 'x> {
    message: &'m Message<'x>,
    /// Pending `(part id, depth)` pairs; the next part to visit is on top.
    stack: Vec<(MessagePartId, usize)>,
    index: usize,
}

impl<'m, 'x> Parts<'m, 'x> {
    fn section_error(&mut self, reason: impl Into<String>) -> Result<MimePart<'m>> {
        let index = self.index;
        self.index += 1;
        Err(Error::PartParse {
            index,
            reason: reason.into(),
        })
    }
}

impl<'m, 'x> Iterator for Parts<'m, 'x> {
    type Item = Result<MimePart<'m>>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((id, depth)) = self.stack.pop() {
            let Some(part) = self.message.part(id) else {
                return Some(self.section_error(format!("dangling part reference {id}")));
            };

            if let PartType::Multipart(children) = &part.body {
                if depth >= MAX_DEPTH {
                    return Some(
                        self.section_error(format!("multipart nesting deeper than {MAX_DEPTH}")),
                    );
                }
                self.stack
                    .extend(children.iter().rev().map(|&child| (child, depth + 1)));
                continue;
            }

            if part.is_encoding_problem {
                return Some(self.section_error("body could not be decoded"));
            }

            let index = self.index;
            self.index += 1;
            return Some(Ok(leaf(index, part)));
        }
        None
    }
}

/// Build a [`MimePart`] view of a leaf.
fn leaf<'m>(index: usize, part: &'m mail_parser::MessagePart<'_>) -> MimePart<'m> {
    let content_type = part.content_type();
    let has_content_type_header = part
        .headers
        .iter()
        .any(|h| matches!(h.name, HeaderName::ContentType));

    MimePart {
        index,
        content_type: content_type.map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_lowercase(),
            None => ct.ctype().to_lowercase(),
        }),
        content_type_malformed: has_content_type_header && content_type.is_none(),
        content_type_params: params(content_type),
        disposition_params: params(part.content_disposition()),
        body: part.contents(),
    }
}

fn params(header: Option<&mail_parser::ContentType<'_>>) -> BTreeMap<String, String> {
    header
        .and_then(|ct| ct.attributes.as_ref())
        .into_iter()
        .flatten()
        .map(|(key, value)| (key.to_lowercase(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE: &[u8] = b"From: a@example.com\r\n\
Subject: scan\r\n\
Content-Type: application/pdf; name=\"scan.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n";

    const NESTED: &[u8] = b"From: a@example.com\r\n\
Subject: nested\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain\r\n\
--inner\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>html</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"a.pdf\"\r\n\
Content-Disposition: attachment; filename=\"ignored.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--outer--\r\n";

    #[test]
    fn test_single_part_yields_root() {
        let entity = MimeEntity::parse(1, SINGLE).unwrap();
        assert!(!entity.is_multipart());
        let parts: Vec<_> = entity.parts().collect::<Result<_>>().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content_type.as_deref(), Some("application/pdf"));
        assert_eq!(
            parts[0].content_type_params.get("name").map(String::as_str),
            Some("scan.pdf")
        );
        assert_eq!(parts[0].body, b"%PDF-1.4\n");
    }

    #[test]
    fn test_nested_multipart_yields_leaves_in_order() {
        let entity = MimeEntity::parse(1, NESTED).unwrap();
        assert!(entity.is_multipart());
        let types: Vec<String> = entity
            .parts()
            .map(|p| p.unwrap().content_type.unwrap_or_default())
            .collect();
        assert_eq!(types, ["text/plain", "text/html", "application/pdf"]);
    }

    #[test]
    fn test_leaf_indices_are_sequential() {
        let entity = MimeEntity::parse(1, NESTED).unwrap();
        let indices: Vec<usize> = entity.parts().map(|p| p.unwrap().index).collect();
        assert_eq!(indices, [0, 1, 2]);
    }

    #[test]
    fn test_disposition_params_are_collected() {
        let entity = MimeEntity::parse(1, NESTED).unwrap();
        let pdf = entity.parts().last().unwrap().unwrap();
        assert_eq!(
            pdf.disposition_params.get("filename").map(String::as_str),
            Some("ignored.pdf")
        );
    }

    #[test]
    fn test_missing_content_type_is_not_malformed() {
        let entity = MimeEntity::parse(1, b"Subject: hi\r\n\r\nbody\r\n").unwrap();
        let part = entity.parts().next().unwrap().unwrap();
        assert!(!part.content_type_malformed);
    }

    #[test]
    fn test_headerless_garbage_is_message_error() {
        assert!(matches!(
            MimeEntity::parse(4, b"this is not a MIME message at all"),
            Err(Error::MessageParse { id: 4, .. })
        ));
    }

    #[test]
    fn test_corrupt_section_leaves_siblings_readable() {
        let raw = b"From: a@example.com\r\n\
Subject: mixed\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"mix\"\r\n\
\r\n\
--mix\r\n\
Content-Type: application/pdf; name=\"one.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
!!!! this is not base64 !!!!\r\n\
--mix\r\n\
Content-Type: application/pdf; name=\"two.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--mix--\r\n";
        let entity = MimeEntity::parse(1, raw).unwrap();
        let parts: Vec<_> = entity.parts().collect();
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[0], Err(Error::PartParse { .. })));
        let second = parts[1].as_ref().unwrap();
        assert_eq!(
            second.content_type_params.get("name").map(String::as_str),
            Some("two.pdf")
        );
        assert_eq!(second.body, b"%PDF-1.4\n");
    }

    #[test]
    fn test_unparseable_content_type_is_flagged() {
        let raw = b"From: a@example.com\r\nContent-Type: ;;;\r\n\r\nbody\r\n";
        let entity = MimeEntity::parse(1, raw).unwrap();
        let part = entity.parts().next().unwrap().unwrap();
        assert!(part.content_type_malformed);
    }

    #[test]
    fn test_empty_input_is_message_error() {
        assert!(matches!(
            MimeEntity::parse(9, b""),
            Err(Error::MessageParse { id: 9, .. })
        ));
    }
}
