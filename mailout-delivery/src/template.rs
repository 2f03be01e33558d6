//! Subject and body templates.
//!
//! Templates are parsed once at startup. Plain-text templates render values
//! verbatim, HTML templates escape them.
//!
//! Form fields are optional, so a template may read a variable the
//! submission never sent. Every variable path a template reads is collected
//! at parse time and any that is missing from the render data is filled with
//! an empty string, the way an absent form field reads as empty. Values read
//! through `default(...)` or checked with `is defined` are left alone so those
//! keep working.

use std::{collections::BTreeSet, fmt, path::Path};

use tera::{
    Context, Map, Tera, Value,
    ast::{Expr, ExprVal, FunctionCall, Node},
};

use crate::{error::RenderError, message::ContentKind};

const TEMPLATE_NAME: &str = "template";

/// Something that writes a rendered template into a byte sink.
pub trait Renderer: fmt::Debug + Send + Sync {
    /// Render into `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if a filter or expression fails. Nothing is written
    /// to `sink` in that case.
    fn render(&self, sink: &mut Vec<u8>, data: &Context) -> Result<(), RenderError>;

    /// Content type of the rendered output.
    fn content_kind(&self) -> ContentKind;
}

/// A parsed template plus the variable paths it reads.
struct Compiled {
    tera: Tera,
    paths: Vec<String>,
}

impl Compiled {
    fn new(source: &str, escape: bool) -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.autoescape_on(if escape { vec![TEMPLATE_NAME] } else { vec![] });
        tera.add_raw_template(TEMPLATE_NAME, source)?;

        let mut paths = BTreeSet::new();
        if let Some(template) = tera.templates.get(TEMPLATE_NAME) {
            node_paths(&template.ast, &mut paths);
        }

        Ok(Self {
            tera,
            paths: paths.into_iter().collect(),
        })
    }

    fn render(&self, data: &Context) -> Result<String, RenderError> {
        if self.paths.is_empty() {
            return Ok(self.tera.render(TEMPLATE_NAME, data)?);
        }

        let mut data = data.clone();
        for path in &self.paths {
            seed(&mut data, path);
        }
        Ok(self.tera.render(TEMPLATE_NAME, &data)?)
    }

    fn render_into(&self, sink: &mut Vec<u8>, data: &Context) -> Result<(), RenderError> {
        let rendered = self.render(data)?;
        sink.extend_from_slice(rendered.as_bytes());
        Ok(())
    }
}

fn node_paths(nodes: &[Node], paths: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            Node::VariableBlock(_, expr) => expr_paths(expr, paths),
            Node::Set(_, set) => expr_paths(&set.value, paths),
            Node::FilterSection(_, section, _) => {
                call_paths(&section.filter, paths);
                node_paths(&section.body, paths);
            }
            Node::Block(_, block, _) => node_paths(&block.body, paths),
            Node::Forloop(_, forloop, _) => {
                expr_paths(&forloop.container, paths);
                node_paths(&forloop.body, paths);
                if let Some(body) = &forloop.empty_body {
                    node_paths(body, paths);
                }
            }
            Node::If(branches, _) => {
                for (_, condition, body) in &branches.conditions {
                    expr_paths(condition, paths);
                    node_paths(body, paths);
                }
                if let Some((_, body)) = &branches.otherwise {
                    node_paths(body, paths);
                }
            }
            _ => {}
        }
    }
}

fn expr_paths(expr: &Expr, paths: &mut BTreeSet<String>) {
    match &expr.val {
        ExprVal::Ident(ident) if !expr.has_default_filter() => {
            paths.insert(ident.clone());
        }
        ExprVal::Math(math) => {
            expr_paths(&math.lhs, paths);
            expr_paths(&math.rhs, paths);
        }
        ExprVal::Logic(logic) => {
            expr_paths(&logic.lhs, paths);
            expr_paths(&logic.rhs, paths);
        }
        ExprVal::In(within) => {
            expr_paths(&within.lhs, paths);
            expr_paths(&within.rhs, paths);
        }
        ExprVal::Test(test) => {
            if !matches!(test.name.as_str(), "defined" | "undefined") {
                paths.insert(test.ident.clone());
            }
            for arg in &test.args {
                expr_paths(arg, paths);
            }
        }
        ExprVal::FunctionCall(call) => call_paths(call, paths),
        ExprVal::MacroCall(call) => {
            for arg in call.args.values() {
                expr_paths(arg, paths);
            }
        }
        ExprVal::Array(items) => {
            for item in items {
                expr_paths(item, paths);
            }
        }
        ExprVal::StringConcat(concat) => {
            for value in &concat.values {
                if let ExprVal::Ident(ident) = value {
                    paths.insert(ident.clone());
                }
            }
        }
        _ => {}
    }

    for filter in &expr.filters {
        call_paths(filter, paths);
    }
}

fn call_paths(call: &FunctionCall, paths: &mut BTreeSet<String>) {
    for arg in call.args.values() {
        expr_paths(arg, paths);
    }
}

/// Fill `path` with an empty string if `data` does not reach it.
///
/// Only object values are extended; a path running into a string or an
/// array is left for the template engine to report.
fn seed(data: &mut Context, path: &str) {
    if path.contains('[') {
        return;
    }

    let mut segments = path.split('.');
    let Some(root) = segments.next() else {
        return;
    };
    if root == "loop" || root.starts_with("__tera") {
        return;
    }
    let rest = segments.collect::<Vec<_>>();

    match data.get(root) {
        None => data.insert(root, &placeholder(&rest)),
        Some(value) => {
            let mut value = value.clone();
            if extend(&mut value, &rest) {
                data.insert(root, &value);
            }
        }
    }
}

fn extend(value: &mut Value, rest: &[&str]) -> bool {
    let Some((first, tail)) = rest.split_first() else {
        return false;
    };
    let Value::Object(map) = value else {
        return false;
    };

    match map.get_mut(*first) {
        Some(child) => extend(child, tail),
        None => {
            map.insert((*first).to_string(), placeholder(tail));
            true
        }
    }
}

fn placeholder(rest: &[&str]) -> Value {
    rest.iter()
        .rev()
        .fold(Value::String(String::new()), |inner, key| {
            let mut map = Map::new();
            map.insert((*key).to_string(), inner);
            Value::Object(map)
        })
}

/// A template rendered without escaping.
pub struct TextTemplate {
    compiled: Compiled,
}

impl TextTemplate {
    /// # Errors
    ///
    /// Returns an error if `source` is not a valid template.
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        Ok(Self {
            compiled: Compiled::new(source, false)?,
        })
    }

    /// Render to a string.
    ///
    /// # Errors
    ///
    /// See [`Renderer::render`].
    pub fn render_string(&self, data: &Context) -> Result<String, RenderError> {
        self.compiled.render(data)
    }
}

impl fmt::Debug for TextTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextTemplate")
            .field("paths", &self.compiled.paths)
            .finish_non_exhaustive()
    }
}

impl Renderer for TextTemplate {
    fn render(&self, sink: &mut Vec<u8>, data: &Context) -> Result<(), RenderError> {
        self.compiled.render_into(sink, data)
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Plain
    }
}

/// A template whose substituted values are HTML-escaped.
pub struct HtmlTemplate {
    compiled: Compiled,
}

impl HtmlTemplate {
    /// # Errors
    ///
    /// Returns an error if `source` is not a valid template.
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        Ok(Self {
            compiled: Compiled::new(source, true)?,
        })
    }
}

impl fmt::Debug for HtmlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmlTemplate")
            .field("paths", &self.compiled.paths)
            .finish_non_exhaustive()
    }
}

impl Renderer for HtmlTemplate {
    fn render(&self, sink: &mut Vec<u8>, data: &Context) -> Result<(), RenderError> {
        self.compiled.render_into(sink, data)
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Html
    }
}


/// Load a body template, choosing the renderer from the file extension.
///
/// # Errors
///
/// Returns an error if the extension is neither `.txt` nor `.html`, the file
/// is missing or empty, or it does not parse.
pub fn load_body(path: &Path) -> Result<Box<dyn Renderer>, RenderError> {
    let escape = match path.extension().and_then(|ext| ext.to_str()) {
        Some("txt") => false,
        Some("html") => true,
        _ => return Err(RenderError::UnsupportedExtension(path.to_path_buf())),
    };

    if !path.is_file() {
        return Err(RenderError::NotFound(path.to_path_buf()));
    }

    let source = std::fs::read_to_string(path).map_err(|source| RenderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if source.is_empty() {
        return Err(RenderError::NotFound(path.to_path_buf()));
    }

    Ok(if escape {
        Box::new(HtmlTemplate::parse(&source)?)
    } else {
        Box::new(TextTemplate::parse(&source)?)
    })
}
