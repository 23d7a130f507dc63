//! MIME entity parser.
//!
//! [`Parser`] owns everything one parse needs: configuration, the codec
//! registry, the filer for decoded bodies, the redo hooks and the scratch
//! store. A parse is bootstrapped as the first queued task; the queue is
//! then drained until every deferred re-parse and redo has run.

mod engine;
pub mod reader;
pub mod redo;
pub mod results;
pub mod tasks;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::codec::CodecRegistry;
use crate::config::{Config, NestedMessages};
use crate::error::{MimeError, Result};
use crate::model::{Entity, EntityPath, Header};
use crate::store::filer::filer_from_config;
use crate::store::{Filer, InCoreFiler, ScratchStore};
use engine::Engine;
use reader::{BoundaryReader, LineSource};
use redo::{hook_from_kind, RedoContext, RedoHook, RedoResult};
use results::ParseResults;
use tasks::{Task, TaskQueue};

pub struct Parser {
    config: Config,
    codecs: CodecRegistry,
    filer: Box<dyn Filer>,
    hooks: Vec<Box<dyn RedoHook>>,
    scratch: ScratchStore,
    results: ParseResults,
    last_head: Option<Header>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// A parser with default settings: tolerant, bodies kept in memory,
    /// no redo hooks.
    pub fn new() -> Self {
        let config = Config::default();
        Self {
            scratch: ScratchStore::new(config.output.tmp_to_core),
            config,
            codecs: CodecRegistry::default(),
            filer: Box::new(InCoreFiler),
            hooks: Vec::new(),
            results: ParseResults::new(),
            last_head: None,
        }
    }

    /// Build a parser from a loaded [`Config`], including its filer and
    /// redo hooks.
    pub fn with_config(config: Config) -> Result<Self> {
        let filer = filer_from_config(&config.output)?;
        let hooks = config
            .parser
            .redo_hooks
            .iter()
            .map(|&kind| hook_from_kind(kind, &config.redo))
            .collect();
        Ok(Self {
            scratch: ScratchStore::new(config.output.tmp_to_core),
            codecs: CodecRegistry::default(),
            filer,
            hooks,
            results: ParseResults::new(),
            last_head: None,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_decode_headers(&mut self, on: bool) {
        self.config.parser.decode_headers = on;
    }

    pub fn set_extract_nested_messages(&mut self, policy: NestedMessages) {
        self.config.parser.extract_nested_messages = policy;
    }

    pub fn set_extract_encoded_containers(&mut self, on: bool) {
        self.config.parser.extract_encoded_containers = on;
    }

    pub fn set_ignore_errors(&mut self, on: bool) {
        self.config.parser.ignore_errors = on;
    }

    pub fn set_max_depth(&mut self, depth: usize) {
        self.config.parser.max_depth = depth;
    }

    pub fn set_filer(&mut self, filer: Box<dyn Filer>) {
        self.filer = filer;
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Install or remove codecs before parsing.
    pub fn codecs_mut(&mut self) -> &mut CodecRegistry {
        &mut self.codecs
    }

    /// Append a hook; hooks run in the order they were added.
    pub fn push_redo_hook(&mut self, hook: Box<dyn RedoHook>) {
        self.hooks.push(hook);
    }

    pub fn clear_redo_hooks(&mut self) {
        self.hooks.clear();
    }

    /// Diagnostics from the most recent parse.
    pub fn results(&self) -> &ParseResults {
        &self.results
    }

    /// The top-level header of the most recent parse, available even when
    /// the parse failed after reading it.
    pub fn last_head(&self) -> Option<&Header> {
        self.last_head.as_ref()
    }

    /// Parse a complete message from `reader`.
    pub fn parse<R: Read>(&mut self, reader: R) -> Result<Entity> {
        self.results.clear();
        self.last_head = None;

        let Self {
            config,
            codecs,
            filer,
            hooks,
            scratch,
            results,
            last_head,
        } = self;

        let mut root: Option<Entity> = None;
        let mut queue: TaskQueue<Task<'_>> = TaskQueue::new();
        queue.push(Task::ParseRoot {
            source: LineSource::new(BufReader::new(reader)),
        });

        queue.drain_all(|q, task| {
            let mut engine = Engine {
                config: &config.parser,
                codecs: &*codecs,
                filer: &mut **filer,
                scratch: &mut *scratch,
                results: &mut *results,
                last_head: &mut *last_head,
            };
            run_task(&mut engine, hooks, &mut root, q, task)
        })?;

        let root =
            root.ok_or_else(|| MimeError::Internal("parse finished without a root entity".into()))?;
        info!(
            parts = root.leaves().len(),
            warnings = self.results.warnings().count(),
            "Parsed message"
        );
        Ok(root)
    }

    /// Parse a message held in memory.
    pub fn parse_data(&mut self, data: &[u8]) -> Result<Entity> {
        self.parse(data)
    }

    /// Open and parse the message file at `path`.
    pub fn parse_open(&mut self, path: impl AsRef<Path>) -> Result<Entity> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| MimeError::io(path, e))?;
        debug!(path = %path.display(), "Parsing file");
        self.parse(file)
    }
}

fn run_task<'a>(
    engine: &mut Engine<'_>,
    hooks: &[Box<dyn RedoHook>],
    root: &mut Option<Entity>,
    q: &mut TaskQueue<Task<'a>>,
    task: Task<'a>,
) -> Result<()> {
    match task {
        Task::ParseRoot { mut source } => {
            let (ent, _) =
                engine.parse_part(q, &mut source, &BoundaryReader::new(), Vec::new(), 0, None)?;
            *root = Some(ent);
            Ok(())
        }
        Task::Reparse { path, class, depth } => {
            let root = root_mut(root)?;
            engine.reparse(q, root, &path, class, depth)
        }
        Task::Redo { path, depth } => {
            if hooks.is_empty() {
                return Ok(());
            }
            let root = root_mut(root)?;
            run_redo(engine, hooks, root, &path, depth)
        }
    }
}

fn root_mut(root: &mut Option<Entity>) -> Result<&mut Entity> {
    root.as_mut()
        .ok_or_else(|| MimeError::Internal("task queued before the root was parsed".into()))
}

/// Offer the leaf at `path` to each hook in turn and swap in the first
/// replacement.
fn run_redo(
    engine: &mut Engine<'_>,
    hooks: &[Box<dyn RedoHook>],
    root: &mut Entity,
    path: &EntityPath,
    depth: usize,
) -> Result<()> {
    let ent = root
        .descendant_mut(path)
        .ok_or_else(|| MimeError::Internal(format!("no entity at {path:?} to redo")))?;

    let mut replacement = None;
    for hook in hooks {
        let Some(body) = ent.body() else {
            return Ok(());
        };
        let mut input = body.open_read()?;
        let mut ctx = RedoContext {
            filer: &mut *engine.filer,
            codecs: engine.codecs,
        };
        match hook.try_redo(&mut *input, ent, &mut ctx) {
            Ok(RedoResult::NoMatch) => {
                engine
                    .results
                    .debug(depth, format!("Redo hook '{}' did not match", hook.name()));
            }
            Ok(RedoResult::Replace(new)) => {
                debug!(hook = hook.name(), ?path, "Redo hook replaced entity");
                replacement = Some(new);
                break;
            }
            Err(e) => {
                warn!(hook = hook.name(), error = %e, "Redo hook failed");
                engine
                    .results
                    .warn(depth, format!("Redo hook '{}' failed: {e}", hook.name()));
            }
        }
    }

    if let Some(new) = replacement {
        if let Some(mut old) = ent.take_body() {
            if let Err(e) = old.purge() {
                engine
                    .results
                    .warn(depth, format!("Could not remove replaced body: {e}"));
            }
        }
        *ent = *new;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MimeType;
    use crate::parser::redo::UuSniff;
    use std::io::BufRead;

    fn body_of(ent: &Entity) -> Vec<u8> {
        ent.body().unwrap().read_all().unwrap()
    }

    #[test]
    fn test_parse_data_single_part() {
        let mut parser = Parser::new();
        let ent = parser.parse_data(b"Subject: hi\n\nhello\n").unwrap();
        assert_eq!(ent.head().get("subject"), Some("hi"));
        assert_eq!(body_of(&ent), b"hello\n");
        assert!(!parser.results().has_warnings());
    }

    #[test]
    fn test_nest_and_replace() {
        let msg = b"Content-Type: message/rfc822\n\nSubject: inner\n\nhello\n";

        let mut parser = Parser::new();
        let nested = parser.parse_data(msg).unwrap();
        assert!(nested.body().is_none());
        assert_eq!(nested.num_parts(), 1);
        assert_eq!(nested.parts()[0].head().get("subject"), Some("inner"));

        parser.set_extract_nested_messages(NestedMessages::Replace);
        let replaced = parser.parse_data(msg).unwrap();
        let direct = Parser::new().parse_data(b"Subject: inner\n\nhello\n").unwrap();
        assert_eq!(replaced.head(), direct.head());
        assert_eq!(body_of(&replaced), body_of(&direct));

        parser.set_extract_nested_messages(NestedMessages::Off);
        let opaque = parser.parse_data(msg).unwrap();
        assert_eq!(body_of(&opaque), b"Subject: inner\n\nhello\n");
    }

    #[test]
    fn test_base64_multipart_is_reparsed() {
        let msg = b"Content-Type: multipart/mixed; boundary=XX\nContent-Transfer-Encoding: base64\n\nLS1YWAoKaGkKLS1YWC0tCg==\n";
        let mut parser = Parser::new();
        let ent = parser.parse_data(msg).unwrap();
        assert!(ent.body().is_none());
        assert_eq!(ent.head().mime_encoding(), "binary");
        assert_eq!(ent.num_parts(), 1);
        assert_eq!(body_of(&ent.parts()[0]), b"hi");

        parser.set_extract_encoded_containers(false);
        let opaque = parser.parse_data(msg).unwrap();
        assert_eq!(opaque.num_parts(), 0);
        assert_eq!(body_of(&opaque), b"--XX\n\nhi\n--XX--\n");
    }

    #[test]
    fn test_base64_message_is_nested() {
        // base64 of "Subject: in\n\nx\n"
        let msg = b"Content-Type: message/rfc822\nContent-Transfer-Encoding: base64\n\nU3ViamVjdDogaW4KCngK\n";
        let ent = Parser::new().parse_data(msg).unwrap();
        assert!(ent.body().is_none());
        assert_eq!(ent.num_parts(), 1);
        assert_eq!(ent.parts()[0].head().get("subject"), Some("in"));
        assert_eq!(body_of(&ent.parts()[0]), b"x\n");
    }

    #[test]
    fn test_strict_failure_keeps_last_head() {
        let mut parser = Parser::new();
        parser.set_ignore_errors(false);
        let err = parser
            .parse_data(b"Content-Type: multipart/mixed\nSubject: s\n\nx\n")
            .unwrap_err();
        assert!(matches!(err, MimeError::Structural(_)));
        assert!(parser.results().has_errors());
        assert_eq!(parser.last_head().unwrap().get("subject"), Some("s"));
    }

    #[test]
    fn test_missing_boundary_is_unparseable_in_tolerant_mode() {
        let mut parser = Parser::new();
        let ent = parser.parse_data(b"Content-Type: multipart/mixed\n\nx\n").unwrap();
        assert_eq!(
            ent.effective_type(),
            MimeType::new("application", "x-unparseable-multipart")
        );
        assert_eq!(body_of(&ent), b"x\n");
        assert!(parser.results().has_warnings());
    }

    #[test]
    fn test_uu_sniff_rewrites_leaf() {
        let mut parser = Parser::new();
        parser.push_redo_hook(Box::new(UuSniff::new(24)));
        let ent = parser
            .parse_data(b"Subject: files\n\nhello\nbegin 644 a.txt\n\":&D`\n`\nend\n")
            .unwrap();
        assert_eq!(ent.effective_type(), MimeType::new("multipart", "mixed"));
        assert_eq!(ent.head().get("subject"), Some("files"));
        assert_eq!(ent.num_parts(), 2);
        assert_eq!(body_of(&ent.parts()[0]), b"hello\n");
        assert_eq!(
            ent.parts()[1].head().recommended_filename().as_deref(),
            Some("a.txt")
        );
        assert_eq!(body_of(&ent.parts()[1]), b"hi");
    }

    struct Failing;

    impl RedoHook for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn try_redo(
            &self,
            _body: &mut dyn BufRead,
            _entity: &Entity,
            _ctx: &mut RedoContext<'_>,
        ) -> Result<RedoResult> {
            Err(MimeError::Internal("boom".into()))
        }
    }

    #[test]
    fn test_failing_hook_counts_as_no_match() {
        let mut parser = Parser::new();
        parser.push_redo_hook(Box::new(Failing));
        parser.push_redo_hook(Box::new(UuSniff::new(-1)));
        let ent = parser
            .parse_data(b"\nbegin 644 a.txt\n\":&D`\n`\nend\n")
            .unwrap();
        assert_eq!(ent.num_parts(), 1);
        assert!(parser
            .results()
            .warnings()
            .any(|d| d.message.contains("failing")));
    }

    #[test]
    fn test_hook_no_match_is_reported_at_debug() {
        use crate::parser::results::Severity;

        let mut parser = Parser::new();
        parser.push_redo_hook(Box::new(UuSniff::new(24)));
        let ent = parser.parse_data(b"Subject: x\n\nhello\n").unwrap();
        assert_eq!(ent.num_parts(), 0);
        assert!(!parser.results().has_warnings());
        assert!(parser.results().diagnostics().iter().any(|d| {
            d.severity == Severity::Debug && d.message == "Redo hook 'uu-sniff' did not match"
        }));
    }

    #[test]
    fn test_results_reset_between_parses() {
        let mut parser = Parser::new();
        parser.parse_data(b"Subject: cut\n").unwrap();
        assert!(parser.results().has_warnings());
        parser.parse_data(b"Subject: ok\n\nfine\n").unwrap();
        assert!(!parser.results().has_warnings());
    }
}
