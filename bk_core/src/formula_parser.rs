//! Formula file parser.
//!
//! Formulas are written in a small declarative Ruby DSL. The file is parsed
//! with tree-sitter and only recognised calls are read; nothing is executed,
//! and `def` methods or unknown calls are ignored.
//!
//! # Supported DSL Elements
//!
//! ```ruby
//! class Nginx < Formula
//!   homepage "http://nginx.org/"
//!   url "http://nginx.org/download/nginx-1.0.14.tar.gz"
//!   md5 "019844e48c34952253ca26dd6e28c35c"      # or sha1 / sha256
//!   version "1.0.14"                            # optional, else taken from url
//!
//!   devel do                                    # also: head do ... end
//!     url "..."
//!     md5 "..."
//!   end
//!
//!   depends_on "pcre"
//!   skip_clean "logs"
//!
//!   option "--with-webdav", "Compile with WebDAV" do
//!     configure_arg "--with-http_dav_module"
//!   end
//!   option "--with-passenger", "Compile with Passenger" do
//!     tool_root "passenger-config", "--root", arg: "--add-module={root}/ext/nginx"
//!   end
//!   option "--with-mod-zip", "Compile with mod_zip" do
//!     resource "http://.../mod_zip-1.1.6.tar.gz", sha1: "...", arg: "--add-module={path}"
//!   end
//!
//!   patch :DATA                                 # or: patch :p0, :DATA
//!   patch do
//!     url "https://.../fix.diff"
//!     sha256 "..."
//!   end
//!
//!   configure "--prefix={prefix}", "--with-pcre"
//!   system "make"
//!   system "make", "install"
//!
//!   service do
//!     run "{prefix}/sbin/nginx", "-g", "daemon off;"
//!     working_dir "{prefix}"
//!     run_at_load true
//!     keep_alive true
//!   end
//!
//!   caveats "..."
//! end
//! __END__
//! # Attribution line(s) for the first inline patch
//! --- a/file
//! +++ b/file
//! ...
//! ```

use tree_sitter::{Node, Parser};

use crate::errors::ValidationError;
use crate::formula::{
    Checksum, DEFAULT_VARIANT, DigestAlgorithm, FormulaOption, FormulaSpec, OptionEffect, Patch,
    PatchSource, Resource, ServiceSpec, SourceVariant,
};

/// Error type for formula parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Failed to initialize tree-sitter parser.
    ParserInit,
    /// Failed to parse Ruby source code.
    ParseFailed,
    /// Formula class not found in source.
    NoFormulaClass,
    /// Required field is missing.
    MissingField(&'static str),
    /// Invalid field value.
    InvalidValue { field: &'static str, message: String },
    /// The formula parsed but breaks a structural rule.
    Invalid(ValidationError),
    /// JSON formula could not be deserialized.
    Json(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::ParserInit => write!(f, "failed to initialize Ruby parser"),
            ParseError::ParseFailed => write!(f, "failed to parse Ruby source"),
            ParseError::NoFormulaClass => write!(f, "no Formula class found in source"),
            ParseError::MissingField(field) => write!(f, "missing required field: {}", field),
            ParseError::InvalidValue { field, message } => {
                write!(f, "invalid value for {}: {}", field, message)
            }
            ParseError::Invalid(e) => write!(f, "invalid formula: {}", e),
            ParseError::Json(message) => write!(f, "invalid formula JSON: {}", message),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses a JSON-serialized formula and validates it.
pub fn parse_json_formula(source: &str) -> Result<FormulaSpec, ParseError> {
    let spec: FormulaSpec =
        serde_json::from_str(source).map_err(|e| ParseError::Json(e.to_string()))?;
    spec.validate().map_err(ParseError::Invalid)?;
    Ok(spec)
}

/// Parses a Ruby formula file into a validated `FormulaSpec`.
///
/// # Arguments
/// * `source` - The formula source, including any `__END__` section.
/// * `name` - The formula name (typically the file stem). When empty it is
///   derived from the class name (`MyTool` becomes `my-tool`).
pub fn parse_ruby_formula(source: &str, name: &str) -> Result<FormulaSpec, ParseError> {
    let (code, data) = split_data_section(source);

    let mut parser = Parser::new();
    let language = tree_sitter_ruby::LANGUAGE;
    parser
        .set_language(&language.into())
        .map_err(|_| ParseError::ParserInit)?;

    let tree = parser.parse(code, None).ok_or(ParseError::ParseFailed)?;
    let root = tree.root_node();

    let class_node = find_formula_class(root, code)?;

    let name = if name.is_empty() {
        class_node
            .child_by_field_name("name")
            .map(|n| class_to_formula_name(&get_node_text(&n, code)))
            .unwrap_or_default()
    } else {
        name.to_string()
    };

    let mut draft = FormulaDraft::new(name, data.map(parse_data_blocks));
    parse_class_body(class_node, code, &mut draft)?;

    let spec = draft.finish();
    spec.validate().map_err(ParseError::Invalid)?;
    Ok(spec)
}

/// Source URL, checksum and version collected for one variant.
#[derive(Debug, Default)]
struct VariantDraft {
    url: Option<String>,
    checksum: Option<Checksum>,
    version: Option<String>,
}

impl VariantDraft {
    /// Applies a `url`/`md5`/`sha1`/`sha256`/`version` call. Returns false for other methods.
    fn apply(&mut self, method: &str, node: Node, source: &str) -> bool {
        if let Some(algorithm) = DigestAlgorithm::from_name(method) {
            if let Some(digest) = extract_string_arg(node, source) {
                self.checksum = Some(Checksum::new(algorithm, digest));
            }
            return true;
        }

        match method {
            "url" => self.url = extract_string_arg(node, source),
            "version" => self.version = extract_string_arg(node, source),
            _ => return false,
        }
        true
    }

    fn finish(self, id: &str, default: bool) -> Option<SourceVariant> {
        let url = self.url?;
        Some(SourceVariant {
            id: id.to_string(),
            url,
            // An empty digest is reported by validation
            checksum: self
                .checksum
                .unwrap_or_else(|| Checksum::sha256(String::new())),
            version: self.version,
            default,
        })
    }
}

struct FormulaDraft {
    spec: FormulaSpec,
    stable: VariantDraft,
    named: Vec<(String, VariantDraft)>,
    data_patches: Option<Vec<(String, String)>>,
}

impl FormulaDraft {
    fn new(name: String, data_patches: Option<Vec<(String, String)>>) -> Self {
        Self {
            spec: FormulaSpec {
                name,
                ..Default::default()
            },
            stable: VariantDraft::default(),
            named: Vec::new(),
            data_patches,
        }
    }

    fn finish(self) -> FormulaSpec {
        let mut spec = self.spec;
        spec.variants.extend(self.stable.finish(DEFAULT_VARIANT, true));
        for (id, draft) in self.named {
            spec.variants.extend(draft.finish(&id, false));
        }
        spec
    }
}

/// Splits off the `__END__` data section, if any.
fn split_data_section(source: &str) -> (&str, Option<&str>) {
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        if line.trim_end() == "__END__" {
            return (&source[..offset], Some(&source[offset + line.len()..]));
        }
        offset += line.len();
    }
    (source, None)
}

/// Splits a data section into `(attribution, diff)` blocks.
///
/// A block starts with one or more `#` lines; the diff runs until the next
/// `#` line at column zero, which never occurs inside a unified diff.
fn parse_data_blocks(data: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut attribution: Vec<String> = Vec::new();
    let mut diff = String::new();

    fn flush(blocks: &mut Vec<(String, String)>, attribution: &mut Vec<String>, diff: &mut String) {
        if diff.trim().is_empty() {
            return;
        }
        if !diff.ends_with('\n') {
            diff.push('\n');
        }
        blocks.push((attribution.join(" "), std::mem::take(diff)));
        attribution.clear();
    }

    for line in data.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        if bare.starts_with('#') {
            flush(&mut blocks, &mut attribution, &mut diff);
            let text = bare.trim_start_matches('#').trim();
            if !text.is_empty() {
                attribution.push(text.to_string());
            }
        } else if diff.is_empty() && bare.trim().is_empty() {
            continue;
        } else {
            diff.push_str(line);
        }
    }
    flush(&mut blocks, &mut attribution, &mut diff);

    blocks
}

/// `MyTool` -> `my-tool`
fn class_to_formula_name(class: &str) -> String {
    let mut name = String::new();
    for (i, c) in class.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                name.push('-');
            }
            name.push(c.to_ascii_lowercase());
        } else {
            name.push(c);
        }
    }
    name
}

/// Finds the Formula class definition in the AST.
fn find_formula_class<'t>(root: Node<'t>, source: &str) -> Result<Node<'t>, ParseError> {
    let mut cursor = root.walk();

    for child in root.children(&mut cursor) {
        if child.kind() == "class" {
            // The superclass node contains "< Formula", we need the constant inside
            if let Some(superclass) = child.child_by_field_name("superclass") {
                let mut sc_cursor = superclass.walk();
                for sc_child in superclass.children(&mut sc_cursor) {
                    if sc_child.kind() == "constant" && get_node_text(&sc_child, source) == "Formula" {
                        return Ok(child);
                    }
                }
            }
        }
    }

    Err(ParseError::NoFormulaClass)
}

/// Parses the body of a Formula class.
fn parse_class_body(class_node: Node, source: &str, draft: &mut FormulaDraft) -> Result<(), ParseError> {
    let Some(body) = class_node.child_by_field_name("body") else {
        return Ok(());
    };

    let mut cursor = body.walk();
    let calls: Vec<Node> = body
        .children(&mut cursor)
        .filter(|c| c.kind() == "call" || c.kind() == "method_call")
        .collect();

    for call in calls {
        parse_method_call(call, source, draft)?;
    }

    Ok(())
}

/// Parses one top-level DSL call.
fn parse_method_call(node: Node, source: &str, draft: &mut FormulaDraft) -> Result<(), ParseError> {
    let Some(method) = method_name(node, source) else {
        return Ok(());
    };

    if draft.stable.apply(&method, node, source) {
        return Ok(());
    }

    match method.as_str() {
        "homepage" => {
            draft.spec.homepage = extract_string_arg(node, source);
        }
        "desc" => {
            draft.spec.desc = extract_string_arg(node, source);
        }
        "devel" | "head" => {
            let mut variant = VariantDraft {
                url: extract_string_arg(node, source),
                ..Default::default()
            };
            for stmt in block_calls(node) {
                if let Some(m) = method_name(stmt, source) {
                    variant.apply(&m, stmt, source);
                }
            }
            draft.named.push((method.clone(), variant));
        }
        "depends_on" => {
            parse_depends_on(node, source, &mut draft.spec);
        }
        "skip_clean" => {
            draft.spec.skip_clean.extend(extract_string_args(node, source));
        }
        "option" => {
            let option = parse_option(node, source)?;
            draft.spec.options.push(option);
        }
        "patch" => {
            parse_patch(node, source, draft)?;
        }
        "configure" => {
            draft
                .spec
                .install
                .configure
                .get_or_insert_with(Vec::new)
                .extend(extract_string_args(node, source));
        }
        "system" => {
            let command = extract_string_args(node, source);
            if command.is_empty() {
                return Err(ParseError::MissingField("system command"));
            }
            draft.spec.install.steps.push(command);
        }
        "service" => {
            draft.spec.service = Some(parse_service(node, source)?);
        }
        "caveats" => {
            draft.spec.caveats = extract_string_arg(node, source);
        }
        _ => {}
    }

    Ok(())
}

/// Parses a depends_on declaration; `"name" => :build` style tags are accepted and dropped.
fn parse_depends_on(node: Node, source: &str, spec: &mut FormulaSpec) {
    let mut names = extract_string_args(node, source);
    names.extend(
        extract_pairs(node, source)
            .into_iter()
            .map(|(key, _)| key),
    );

    for name in names {
        if !spec.dependencies.contains(&name) {
            spec.dependencies.push(name);
        }
    }
}

/// Parses `option FLAG, DESCRIPTION do ... end`.
fn parse_option(node: Node, source: &str) -> Result<FormulaOption, ParseError> {
    let mut strings = extract_string_args(node, source).into_iter();
    let flag = strings.next().ok_or(ParseError::MissingField("option flag"))?;
    let description = strings.next().unwrap_or_default();

    let mut effects = Vec::new();
    for stmt in block_calls(node) {
        let Some(method) = method_name(stmt, source) else {
            continue;
        };

        match method.as_str() {
            "configure_arg" => {
                effects.extend(
                    extract_string_args(stmt, source)
                        .into_iter()
                        .map(|value| OptionEffect::Arg { value }),
                );
            }
            "tool_root" => {
                let mut strings = extract_string_args(stmt, source).into_iter();
                let tool = strings.next().ok_or(ParseError::MissingField("tool_root tool"))?;
                let template = pair_string(stmt, source, "arg")
                    .ok_or(ParseError::MissingField("tool_root arg"))?;
                effects.push(OptionEffect::ToolRoot {
                    tool,
                    args: strings.collect(),
                    template,
                });
            }
            "resource" => {
                let url = extract_string_arg(stmt, source)
                    .ok_or(ParseError::MissingField("resource url"))?;
                let checksum = pair_checksum(stmt, source)
                    .ok_or(ParseError::MissingField("resource checksum"))?;
                let template = pair_string(stmt, source, "arg")
                    .ok_or(ParseError::MissingField("resource arg"))?;
                effects.push(OptionEffect::Resource {
                    resource: Resource { url, checksum },
                    template,
                });
            }
            other => {
                return Err(ParseError::InvalidValue {
                    field: "option",
                    message: format!("unsupported statement '{}' in option {}", other, flag),
                });
            }
        }
    }

    Ok(FormulaOption {
        flag,
        description,
        effects,
    })
}

/// Parses `patch :DATA`, `patch :p0, :DATA` or `patch [:pN] do url ...; sha256 ... end`.
fn parse_patch(node: Node, source: &str, draft: &mut FormulaDraft) -> Result<(), ParseError> {
    let mut strip = 1;
    let mut from_data = false;

    for symbol in extract_symbol_args(node, source) {
        if symbol == "DATA" {
            from_data = true;
        } else if let Some(level) = symbol.strip_prefix('p').and_then(|n| n.parse().ok()) {
            strip = level;
        } else {
            return Err(ParseError::InvalidValue {
                field: "patch",
                message: format!("unknown patch argument :{}", symbol),
            });
        }
    }

    if from_data {
        let blocks = draft.data_patches.take().ok_or_else(|| ParseError::InvalidValue {
            field: "patch",
            message: "patch :DATA needs an __END__ section with at least one diff".to_string(),
        })?;
        if blocks.is_empty() {
            return Err(ParseError::InvalidValue {
                field: "patch",
                message: "the __END__ section contains no diff".to_string(),
            });
        }

        let start = draft.spec.patches.len();
        for (i, (attribution, content)) in blocks.into_iter().enumerate() {
            let attribution = if attribution.is_empty() {
                format!("inline patch {}", start + i)
            } else {
                attribution
            };
            draft.spec.patches.push(Patch {
                source: PatchSource::Inline { content },
                strip,
                attribution,
            });
        }
        return Ok(());
    }

    let mut variant = VariantDraft::default();
    for stmt in block_calls(node) {
        if let Some(m) = method_name(stmt, source) {
            variant.apply(&m, stmt, source);
        }
    }

    let url = variant.url.ok_or(ParseError::MissingField("patch url"))?;
    let checksum = variant.checksum.ok_or(ParseError::MissingField("patch checksum"))?;
    draft.spec.patches.push(Patch {
        attribution: url.clone(),
        source: PatchSource::Remote(Resource { url, checksum }),
        strip,
    });

    Ok(())
}

/// Parses a `service do ... end` block.
fn parse_service(node: Node, source: &str) -> Result<ServiceSpec, ParseError> {
    let mut service = ServiceSpec {
        program_args: Vec::new(),
        working_dir: None,
        run_at_load: true,
        keep_alive: false,
    };

    for stmt in block_calls(node) {
        let Some(method) = method_name(stmt, source) else {
            continue;
        };
        match method.as_str() {
            "run" => service.program_args = extract_string_args(stmt, source),
            "working_dir" => service.working_dir = extract_string_arg(stmt, source),
            "run_at_load" => service.run_at_load = extract_bool_arg(stmt).unwrap_or(true),
            "keep_alive" => service.keep_alive = extract_bool_arg(stmt).unwrap_or(true),
            _ => {}
        }
    }

    if service.program_args.is_empty() {
        return Err(ParseError::MissingField("service run"));
    }

    Ok(service)
}

/// Gets the method name of a call node.
fn method_name(node: Node, source: &str) -> Option<String> {
    if let Some(method_node) = node.child_by_field_name("method") {
        Some(get_node_text(&method_node, source))
    } else {
        node.child(0).map(|first| get_node_text(&first, source))
    }
}

/// Call statements inside the `do ... end` block attached to a call.
fn block_calls(node: Node) -> Vec<Node> {
    let block = node
        .child_by_field_name("block")
        .or_else(|| find_child_by_kind(node, "do_block"))
        .or_else(|| find_child_by_kind(node, "block"));

    let Some(block) = block else {
        return Vec::new();
    };

    let container = block
        .child_by_field_name("body")
        .or_else(|| find_child_by_kind(block, "body_statement"))
        .or_else(|| find_child_by_kind(block, "block_body"))
        .unwrap_or(block);

    let mut cursor = container.walk();
    container
        .children(&mut cursor)
        .filter(|c| c.kind() == "call" || c.kind() == "method_call")
        .collect()
}

/// Argument nodes of a call, flattening a nested argument list.
fn argument_nodes(node: Node) -> Vec<Node> {
    let Some(args) = node.child_by_field_name("arguments") else {
        return Vec::new();
    };

    let mut cursor = args.walk();
    let mut out = Vec::new();
    for child in args.children(&mut cursor) {
        if child.kind() == "argument_list" {
            let mut inner = child.walk();
            out.extend(child.children(&mut inner));
        } else {
            out.push(child);
        }
    }
    out
}

/// Extracts the first string argument from a method call.
fn extract_string_arg(node: Node, source: &str) -> Option<String> {
    extract_string_args(node, source).into_iter().next()
}

/// Extracts all positional string arguments, in order.
fn extract_string_args(node: Node, source: &str) -> Vec<String> {
    argument_nodes(node)
        .into_iter()
        .filter_map(|child| extract_string_value(child, source))
        .collect()
}

/// Extracts `:symbol` arguments without their leading colon.
fn extract_symbol_args(node: Node, source: &str) -> Vec<String> {
    argument_nodes(node)
        .into_iter()
        .filter(|c| c.kind() == "simple_symbol")
        .map(|c| get_node_text(&c, source).trim_start_matches(':').to_string())
        .collect()
}

fn extract_bool_arg(node: Node) -> Option<bool> {
    argument_nodes(node).into_iter().find_map(|c| match c.kind() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    })
}

/// Extracts `key: value` / `:key => value` / `"key" => value` pairs.
fn extract_pairs<'t>(node: Node<'t>, source: &str) -> Vec<(String, Node<'t>)> {
    let mut pairs = Vec::new();
    for child in argument_nodes(node) {
        match child.kind() {
            "pair" => pairs.extend(parse_pair(child, source)),
            "hash" => {
                let mut cursor = child.walk();
                for pair in child.children(&mut cursor) {
                    if pair.kind() == "pair" {
                        pairs.extend(parse_pair(pair, source));
                    }
                }
            }
            _ => {}
        }
    }
    pairs
}

fn parse_pair<'t>(node: Node<'t>, source: &str) -> Option<(String, Node<'t>)> {
    let key = node.child_by_field_name("key")?;
    let value = node.child_by_field_name("value")?;

    let key_text = extract_string_value(key, source).unwrap_or_else(|| {
        get_node_text(&key, source)
            .trim_start_matches(':')
            .trim_end_matches(':')
            .to_string()
    });

    Some((key_text, value))
}

fn pair_string(node: Node, source: &str, key: &str) -> Option<String> {
    extract_pairs(node, source)
        .into_iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| extract_string_value(v, source))
}

fn pair_checksum(node: Node, source: &str) -> Option<Checksum> {
    extract_pairs(node, source).into_iter().find_map(|(k, v)| {
        let algorithm = DigestAlgorithm::from_name(&k)?;
        let digest = extract_string_value(v, source)?;
        Some(Checksum::new(algorithm, digest))
    })
}

/// Extracts a string value, decoding escape sequences.
fn extract_string_value(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "string" => {
            let mut value = String::new();
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                match child.kind() {
                    "string_content" => value.push_str(&get_node_text(&child, source)),
                    "escape_sequence" => value.push_str(&decode_escape(&get_node_text(&child, source))),
                    // Interpolation is never evaluated; keep the raw text
                    "interpolation" => value.push_str(&get_node_text(&child, source)),
                    _ => {}
                }
            }
            Some(value)
        }
        "bare_string" => Some(get_node_text(&node, source)),
        _ => None,
    }
}

fn decode_escape(seq: &str) -> String {
    match seq {
        "\\n" => "\n".to_string(),
        "\\t" => "\t".to_string(),
        "\\\\" => "\\".to_string(),
        "\\\"" => "\"".to_string(),
        "\\'" => "'".to_string(),
        "\\#" => "#".to_string(),
        other => other.to_string(),
    }
}

/// Gets the text content of a node.
fn get_node_text(node: &Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}

/// Finds a child node by kind.
fn find_child_by_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find(|c| c.kind() == kind);
    found
}
