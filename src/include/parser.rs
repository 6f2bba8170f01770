//! Text form of include trees.
//!
//! ```text
//! list  := item (',' item)*
//! item  := name ('{' list '}')? ('[' TYPE ((',' | '|') TYPE)* ']')?
//! ```
//!
//! The two suffixes may come in either order. Without braces the nested tree
//! is the target's default tree; `{}` asks for an explicitly empty one.
//! Without brackets the association's default policy is used.

use super::IncludeTree;
use crate::cascade::IncludeTypes;
use crate::core::{DbError, Result};
use crate::schema::MetadataRegistry;

pub(crate) fn parse(
    registry: &MetadataRegistry,
    entity_type: &str,
    mask: IncludeTypes,
    text: &str,
) -> Result<IncludeTree> {
    let mut parser = Parser {
        registry,
        chars: text.chars().collect(),
        pos: 0,
        mask,
    };
    let tree = parser.list(entity_type)?;
    parser.skip_whitespace();
    match parser.peek() {
        None => Ok(tree),
        Some(c) => Err(parser.error_at(parser.pos, format!("unexpected '{}'", c))),
    }
}

struct Parser<'a> {
    registry: &'a MetadataRegistry,
    chars: Vec<char>,
    pos: usize,
    mask: IncludeTypes,
}

impl<'a> Parser<'a> {
    fn list(&mut self, entity_type: &str) -> Result<IncludeTree> {
        let mut tree = IncludeTree::new(entity_type, self.mask);
        self.skip_whitespace();
        if matches!(self.peek(), None | Some('}')) {
            return Ok(tree);
        }
        loop {
            self.item(&mut tree)?;
            self.skip_whitespace();
            if self.peek() == Some(',') {
                self.pos += 1;
            } else {
                return Ok(tree);
            }
        }
    }

    fn item(&mut self, tree: &mut IncludeTree) -> Result<()> {
        self.skip_whitespace();
        let name = self.identifier("association name")?;
        let target = self
            .registry
            .association(tree.entity_type(), &name)?
            .target
            .clone();

        let mut policy = None;
        let mut nested = None;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('{') if nested.is_none() => {
                    self.pos += 1;
                    let sub_tree = self.list(&target)?;
                    self.skip_whitespace();
                    self.expect('}')?;
                    nested = Some(sub_tree);
                }
                Some('[') if policy.is_none() => {
                    self.pos += 1;
                    policy = Some(self.include_types()?);
                }
                _ => break,
            }
        }
        tree.merge_parsed(self.registry, &name, policy, nested)
    }

    fn include_types(&mut self) -> Result<IncludeTypes> {
        let mut types = IncludeTypes::NONE;
        loop {
            self.skip_whitespace();
            let start = self.pos;
            let name = self.identifier("include type")?;
            types |= name
                .parse::<IncludeTypes>()
                .map_err(|_| self.error_at(start, format!("unknown include type '{}'", name)))?;
            self.skip_whitespace();
            match self.peek() {
                Some(',') | Some('|') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(types);
                }
                Some(c) => {
                    return Err(self.error_at(self.pos, format!("unexpected '{}' in include types", c)));
                }
                None => return Err(self.error_at(self.pos, "unterminated include types".to_string())),
            }
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error_at(start, format!("expected {}", what)));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error_at(self.pos, format!("expected '{}', found '{}'", expected, c))),
            None => Err(self.error_at(self.pos, format!("expected '{}'", expected))),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn error_at(&self, position: usize, message: String) -> DbError {
        DbError::IncludeParse { position, message }
    }
}

#[cfg(test)]
mod tests {
    use crate::cascade::IncludeTypes;
    use crate::core::DbError;
    use crate::include::IncludeTree;
    use crate::schema::{Association, EntityType, MetadataRegistry, Topology};

    fn registry() -> MetadataRegistry {
        MetadataRegistry::builder()
            .register(
                EntityType::new("Order", "id")
                    .sequence_key()
                    .association(
                        Association::many("lines", "LineItem", Topology::inverse("orderId"))
                            .cascade(IncludeTypes::ALL | IncludeTypes::FETCH),
                    )
                    .association(Association::one(
                        "customer",
                        "Customer",
                        Topology::owning("customerId"),
                    )),
            )
            .register(
                EntityType::new("LineItem", "id")
                    .sequence_key()
                    .association(
                        Association::one("product", "Product", Topology::owning("productId"))
                            .cascade(IncludeTypes::FETCH),
                    ),
            )
            .register(EntityType::new("Customer", "id"))
            .register(EntityType::new("Product", "sku"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_text_is_empty_tree() {
        let tree = IncludeTree::parse(&registry(), "Order", "  ").unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_nested_and_policy_suffixes() {
        let registry = registry();
        let tree = IncludeTree::parse(&registry, "Order", "lines{product}, customer[FETCH]").unwrap();
        assert_eq!(tree.len(), 2);
        let lines = tree.get("lines").unwrap();
        assert_eq!(lines.policy(), IncludeTypes::ALL | IncludeTypes::FETCH);
        assert!(lines.nested().get("product").is_some());
        assert_eq!(tree.get("customer").unwrap().policy(), IncludeTypes::FETCH);

        let swapped = IncludeTree::parse(&registry, "Order", "lines[DELETE|fetch]{}").unwrap();
        let lines = swapped.get("lines").unwrap();
        assert_eq!(lines.policy(), IncludeTypes::DELETE | IncludeTypes::FETCH);
        assert!(lines.nested().is_empty());
    }

    #[test]
    fn test_missing_braces_use_default_subtree() {
        let tree = IncludeTree::parse(&registry(), "Order", "lines").unwrap();
        let nested = tree.get("lines").unwrap().nested();
        assert_eq!(nested.entity_type(), "LineItem");
        assert!(nested.get("product").is_some());
    }

    #[test]
    fn test_unknown_association() {
        let err = IncludeTree::parse(&registry(), "Order", "lines{sku}").unwrap_err();
        assert!(matches!(err, DbError::UnknownAssociation { .. }));
    }

    #[test]
    fn test_syntax_errors_report_position() {
        let registry = registry();
        match IncludeTree::parse(&registry, "Order", "lines{product").unwrap_err() {
            DbError::IncludeParse { position, .. } => assert_eq!(position, 13),
            other => panic!("unexpected error {other:?}"),
        }
        match IncludeTree::parse(&registry, "Order", "lines[EVERYTHING]").unwrap_err() {
            DbError::IncludeParse { position, message } => {
                assert_eq!(position, 6);
                assert!(message.contains("EVERYTHING"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(IncludeTree::parse(&registry, "Order", "lines customer").is_err());
        assert!(IncludeTree::parse(&registry, "Order", "lines,").is_err());
    }
}
