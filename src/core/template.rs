//! Frontend rule templates.
//!
//! A rule template is plain text with `{{ action }}` blocks, for example
//! `Host:{{getTag "subdomain" .Attributes .ServiceName}}.{{.Domain}}`.
//! An action is either a field (`.ServiceName`, `.Domain`, `.Attributes`) or
//! a call to one of the functions in [`TemplateFunction`], whose arguments
//! are string literals or fields. Templates are fully type checked when they
//! are parsed, so rendering a parsed template cannot fail.

use crate::core::attributes::{AttributeResolver, lookup_tag};
use crate::error::TemplateError;

/// Default frontend rule.
pub const DEFAULT_FRONTEND_RULE: &str = "Host:{{.ServiceName}}.{{.Domain}}";

/// Values a rule template is rendered against.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// Service name.
    pub service_name: &'a str,
    /// Configured domain.
    pub domain: &'a str,
    /// Service tags.
    pub attributes: &'a [String],
    /// Resolver used by `getAttribute` and `hasAttribute`.
    pub resolver: &'a AttributeResolver,
}

/// A field available to templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// `.ServiceName`
    ServiceName,
    /// `.Domain`
    Domain,
    /// `.Attributes`
    Attributes,
}

impl Field {
    fn parse(name: &str) -> Result<Self, TemplateError> {
        match name {
            "ServiceName" => Ok(Self::ServiceName),
            "Domain" => Ok(Self::Domain),
            "Attributes" => Ok(Self::Attributes),
            other => Err(TemplateError::UnknownField(other.to_string())),
        }
    }

    fn kind(self) -> Kind {
        match self {
            Self::ServiceName | Self::Domain => Kind::Text,
            Self::Attributes => Kind::List,
        }
    }
}

/// The registered template functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFunction {
    /// `getTag name tags default`: raw tag lookup.
    GetTag,
    /// `hasTag name tags`: raw tag presence.
    HasTag,
    /// `getAttribute name tags default`: prefix-scoped lookup.
    GetAttribute,
    /// `hasAttribute name tags`: prefix-scoped presence.
    HasAttribute,
    /// `toLower value`.
    ToLower,
}

impl TemplateFunction {
    /// Every registered function.
    pub const ALL: [TemplateFunction; 5] = [
        Self::GetTag,
        Self::HasTag,
        Self::GetAttribute,
        Self::HasAttribute,
        Self::ToLower,
    ];

    /// Name used in templates.
    pub fn name(self) -> &'static str {
        match self {
            Self::GetTag => "getTag",
            Self::HasTag => "hasTag",
            Self::GetAttribute => "getAttribute",
            Self::HasAttribute => "hasAttribute",
            Self::ToLower => "toLower",
        }
    }

    /// Look a function up by its template name.
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|function| function.name() == name)
    }

    fn params(self) -> &'static [Kind] {
        match self {
            Self::GetTag | Self::GetAttribute => &[Kind::Text, Kind::List, Kind::Text],
            Self::HasTag | Self::HasAttribute => &[Kind::Text, Kind::List],
            Self::ToLower => &[Kind::Text],
        }
    }

    fn returns(self) -> Kind {
        match self {
            Self::GetTag | Self::GetAttribute | Self::ToLower => Kind::Text,
            Self::HasTag | Self::HasAttribute => Kind::Bool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    List,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Literal(String),
    Field(Field),
}

impl Arg {
    fn kind(&self) -> Kind {
        match self {
            Self::Literal(_) => Kind::Text,
            Self::Field(field) => field.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Field),
    Call(TemplateFunction, Vec<Arg>),
}

/// A parsed, type checked rule template.
///
/// # Examples
///
/// ```rust
/// use routesync::core::{AttributeResolver, RuleContext, RuleTemplate};
///
/// let template = RuleTemplate::parse("Host:{{toLower .ServiceName}}.{{.Domain}}").unwrap();
/// let resolver = AttributeResolver::default();
/// let rule = template.render(&RuleContext {
///     service_name: "Web",
///     domain: "example.com",
///     attributes: &[],
///     resolver: &resolver,
/// });
/// assert_eq!(rule, "Host:web.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTemplate {
    segments: Vec<Segment>,
}

impl RuleTemplate {
    /// Parse and type check a template.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let body_start = start + 2;
            let end = action_end(&rest[body_start..]).ok_or_else(|| TemplateError::Parse {
                offset: offset + start,
                reason: "unterminated action".to_string(),
            })?;
            let body = &rest[body_start..body_start + end];
            segments.push(parse_action(body, offset + start)?);

            let consumed = body_start + end + 2;
            rest = &rest[consumed..];
            offset += consumed;
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Render the template.
    pub fn render(&self, ctx: &RuleContext<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(field) => out.push_str(text_field(*field, ctx)),
                Segment::Call(function, args) => out.push_str(&call(*function, args, ctx)),
            }
        }
        out
    }
}

/// Position of the `}}` closing an action, ignoring any inside string literals.
fn action_end(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_literal => i += 1,
            b'"' => in_literal = !in_literal,
            b'}' if !in_literal && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn parse_action(body: &str, offset: usize) -> Result<Segment, TemplateError> {
    let tokens = tokenize(body, offset)?;
    let (head, args) = tokens.split_first().ok_or_else(|| TemplateError::Parse {
        offset,
        reason: "empty action".to_string(),
    })?;

    match head {
        Token::Literal(_) => Err(TemplateError::Parse {
            offset,
            reason: "an action must start with a field or a function name".to_string(),
        }),
        Token::Word(word) if word.starts_with('.') => {
            if !args.is_empty() {
                return Err(TemplateError::Parse {
                    offset,
                    reason: format!("unexpected arguments after field '{}'", word),
                });
            }
            let field = Field::parse(&word[1..])?;
            if field.kind() == Kind::List {
                return Err(TemplateError::Type(format!(
                    "field '{}' is a list and cannot be printed",
                    word
                )));
            }
            Ok(Segment::Field(field))
        }
        Token::Word(word) => {
            let function = TemplateFunction::lookup(word)
                .ok_or_else(|| TemplateError::UnknownFunction(word.clone()))?;
            let params = function.params();
            if params.len() != args.len() {
                return Err(TemplateError::Arity {
                    function: function.name(),
                    expected: params.len(),
                    actual: args.len(),
                });
            }

            let mut parsed = Vec::with_capacity(args.len());
            for (index, (token, expected)) in args.iter().zip(params).enumerate() {
                let arg = match token {
                    Token::Literal(value) => Arg::Literal(value.clone()),
                    Token::Word(word) if word.starts_with('.') => Arg::Field(Field::parse(&word[1..])?),
                    Token::Word(word) => {
                        return Err(TemplateError::Parse {
                            offset,
                            reason: format!("nested call '{}' is not supported", word),
                        });
                    }
                };
                if arg.kind() != *expected {
                    return Err(TemplateError::Type(format!(
                        "argument {} of '{}' has the wrong type",
                        index + 1,
                        function.name()
                    )));
                }
                parsed.push(arg);
            }
            debug_assert!(function.returns() != Kind::List);
            Ok(Segment::Call(function, parsed))
        }
    }
}

#[derive(Debug)]
enum Token {
    Word(String),
    Literal(String),
}

fn tokenize(body: &str, offset: usize) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut literal = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some(escaped) => literal.push(escaped),
                        None => break,
                    },
                    other => literal.push(other),
                }
            }
            if !closed {
                return Err(TemplateError::Parse {
                    offset,
                    reason: "unterminated string literal".to_string(),
                });
            }
            tokens.push(Token::Literal(literal));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '"' {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(Token::Word(word));
        }
    }

    Ok(tokens)
}

fn text_field<'a>(field: Field, ctx: &RuleContext<'a>) -> &'a str {
    match field {
        Field::ServiceName => ctx.service_name,
        Field::Domain => ctx.domain,
        Field::Attributes => "",
    }
}

fn text_arg<'a>(arg: &'a Arg, ctx: &RuleContext<'a>) -> &'a str {
    match arg {
        Arg::Literal(value) => value,
        Arg::Field(field) => text_field(*field, ctx),
    }
}

fn list_arg<'a>(arg: &Arg, ctx: &RuleContext<'a>) -> &'a [String] {
    match arg {
        Arg::Field(Field::Attributes) => ctx.attributes,
        _ => &[],
    }
}

fn call(function: TemplateFunction, args: &[Arg], ctx: &RuleContext<'_>) -> String {
    match function {
        TemplateFunction::GetTag => {
            let tags = list_arg(&args[1], ctx);
            lookup_tag(tags, text_arg(&args[0], ctx))
                .unwrap_or(text_arg(&args[2], ctx))
                .to_string()
        }
        TemplateFunction::HasTag => {
            let tags = list_arg(&args[1], ctx);
            lookup_tag(tags, text_arg(&args[0], ctx)).is_some().to_string()
        }
        TemplateFunction::GetAttribute => {
            let tags = list_arg(&args[1], ctx);
            ctx.resolver
                .get(tags, text_arg(&args[0], ctx), text_arg(&args[2], ctx))
        }
        TemplateFunction::HasAttribute => {
            let tags = list_arg(&args[1], ctx);
            ctx.resolver.has(tags, text_arg(&args[0], ctx)).to_string()
        }
        TemplateFunction::ToLower => text_arg(&args[0], ctx).to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &str, attributes: &[&str]) -> Result<String, TemplateError> {
        let attributes: Vec<String> = attributes.iter().map(|s| s.to_string()).collect();
        let resolver = AttributeResolver::default();
        let template = RuleTemplate::parse(source)?;
        Ok(template.render(&RuleContext {
            service_name: "web",
            domain: "example.com",
            attributes: &attributes,
            resolver: &resolver,
        }))
    }

    #[test]
    fn test_default_rule() {
        assert_eq!(render(DEFAULT_FRONTEND_RULE, &[]).unwrap(), "Host:web.example.com");
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(render("PathPrefix:/api", &[]).unwrap(), "PathPrefix:/api");
        assert_eq!(render("", &[]).unwrap(), "");
    }

    #[test]
    fn test_get_tag_with_field_default() {
        let source = r#"Host:{{getTag "subdomain" .Attributes .ServiceName}}.{{.Domain}}"#;
        assert_eq!(render(source, &[]).unwrap(), "Host:web.example.com");
        assert_eq!(
            render(source, &["subdomain=api"]).unwrap(),
            "Host:api.example.com"
        );
    }

    #[test]
    fn test_attribute_functions_use_prefix() {
        let source = r#"{{getAttribute "sub" .Attributes "none"}}/{{hasAttribute "canary" .Attributes}}"#;
        assert_eq!(render(source, &["sub=x"]).unwrap(), "none/false");
        assert_eq!(
            render(source, &["traefik.sub=x", "traefik.canary"]).unwrap(),
            "x/true"
        );
    }

    #[test]
    fn test_has_tag_and_to_lower() {
        assert_eq!(render(r#"{{hasTag "blue" .Attributes}}"#, &["blue"]).unwrap(), "true");
        assert_eq!(render(r#"{{toLower "MiXeD"}}"#, &[]).unwrap(), "mixed");
    }

    #[test]
    fn test_escaped_literal() {
        assert_eq!(
            render(r#"{{getTag "x" .Attributes "a\"b"}}"#, &[]).unwrap(),
            "a\"b"
        );
    }

    #[test]
    fn test_closing_braces_inside_literal() {
        assert_eq!(
            render(r#"{{getTag "a}}" .Attributes "x}}y"}}/{{.Domain}}"#, &[]).unwrap(),
            "x}}y/example.com"
        );
        assert_eq!(
            render(r#"{{getTag "a}}" .Attributes ""}}"#, &["a}}=v"]).unwrap(),
            "v"
        );
        assert_eq!(render(r#"{{toLower "\"}}"}}"#, &[]).unwrap(), "\"}}");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            render("Host:{{.ServiceName", &[]),
            Err(TemplateError::Parse { offset: 5, .. })
        ));
        assert!(matches!(render("{{ }}", &[]), Err(TemplateError::Parse { .. })));
        assert_eq!(
            render("{{.Namespace}}", &[]),
            Err(TemplateError::UnknownField("Namespace".to_string()))
        );
        assert_eq!(
            render(r#"{{replace "a" "b"}}"#, &[]),
            Err(TemplateError::UnknownFunction("replace".to_string()))
        );
        assert_eq!(
            render(r#"{{getTag "a" .Attributes}}"#, &[]),
            Err(TemplateError::Arity {
                function: "getTag",
                expected: 3,
                actual: 2
            })
        );
        assert!(matches!(
            render(r#"{{getTag "a" .Domain "b"}}"#, &[]),
            Err(TemplateError::Type(_))
        ));
        assert!(matches!(render("{{.Attributes}}", &[]), Err(TemplateError::Type(_))));
        assert!(matches!(
            render(r#"{{toLower "abc}}"#, &[]),
            Err(TemplateError::Parse { .. })
        ));
    }

    #[test]
    fn test_lookup_registry() {
        for function in TemplateFunction::ALL {
            assert_eq!(TemplateFunction::lookup(function.name()), Some(function));
        }
        assert_eq!(TemplateFunction::lookup("printf"), None);
    }
}
