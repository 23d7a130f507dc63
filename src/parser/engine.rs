//! The recursive-descent entity parser.
//!
//! [`Engine::parse_part`] reads one header, classifies the body and hands
//! it to the multipart loop, the nested-message handler or the leaf
//! decoder. Every read is bounded by a [`BoundaryReader`], and each
//! function returns the [`Terminator`] that stopped it, relative to the
//! reader it was given. Work that must wait until a subtree is finished
//! (re-parsing decoded containers, redo hooks) goes on the task queue.

use std::io::{self, Write};

use tracing::debug;

use super::reader::{BoundaryReader, HeaderEnd, LineSource, Terminator};
use super::results::ParseResults;
use super::tasks::{Task, TaskQueue};
use crate::codec::CodecRegistry;
use crate::config::{NestedMessages, ParserConfig};
use crate::error::{MimeError, Result};
use crate::model::entity::split_lines;
use crate::model::{Body, Classification, Entity, EntityPath, Header, MimeType};
use crate::store::{Filer, ScratchStore};

/// Encodings whose bytes can be parsed as structure without decoding.
const IDENTITY_ENCODINGS: [&str; 3] = ["7bit", "8bit", "binary"];

/// Borrowed view of a parser's state for the duration of one task.
pub(crate) struct Engine<'p> {
    pub config: &'p ParserConfig,
    pub codecs: &'p CodecRegistry,
    pub filer: &'p mut dyn Filer,
    pub scratch: &'p mut ScratchStore,
    pub results: &'p mut ParseResults,
    pub last_head: &'p mut Option<Header>,
}

impl Engine<'_> {
    /// Parse one entity: header, then body according to its type and
    /// encoding.
    pub fn parse_part<'a>(
        &mut self,
        q: &mut TaskQueue<Task<'a>>,
        src: &mut LineSource<'_>,
        rdr: &BoundaryReader,
        path: EntityPath,
        depth: usize,
        retype: Option<&MimeType>,
    ) -> Result<(Entity, Terminator)> {
        let (mut lines, end) = rdr.read_header_lines(src)?;

        let bogus = lines.iter().take_while(|l| is_bogus_line(l)).count();
        if bogus > 0 {
            self.results.warn(
                depth,
                format!("Discarding {bogus} bogus line(s) before the header"),
            );
            lines.drain(..bogus);
        }

        let extracted = Header::extract(&lines, self.config.decode_headers);
        let mut head = extracted.header;
        if let Some(mime_type) = retype {
            if head.get("content-type").is_none() {
                head.set_mime_type(mime_type);
            }
        }
        if depth == 0 {
            *self.last_head = Some(head.clone());
        }
        if let Some(first) = extracted.leftover.first() {
            self.recover(
                depth,
                MimeError::Syntax(format!(
                    "{} unparseable header line(s), first: {first:?}",
                    extracted.leftover.len()
                )),
            )?;
        }
        let mut ent = Entity::new(head);

        match end {
            HeaderEnd::Blank => {}
            HeaderEnd::Eof => {
                self.recover(
                    depth,
                    MimeError::Structural("unterminated header: input ended before the blank line".into()),
                )?;
                ent.set_body(self.empty_body(ent.head())?);
                return Ok((ent, Terminator::Eof));
            }
            HeaderEnd::Boundary => {
                self.results
                    .warn(depth, "Header cut off by a boundary, part has an empty body");
                ent.set_body(self.empty_body(ent.head())?);
                let term = rdr.read_until_boundary(src, &mut io::sink())?;
                return Ok((ent, term));
            }
        }

        let mime_type = ent.head().mime_type();
        let encoding = ent.head().mime_encoding();
        let extract_nested = self.config.extract_nested_messages != NestedMessages::Off;
        let class = Classification::of(&mime_type, extract_nested);
        self.results.debug(
            depth,
            format!("Classified {mime_type} ({encoding}) as {class:?}"),
        );

        if class != Classification::Singlepart && depth >= self.config.max_depth {
            self.recover(
                depth,
                MimeError::Structural(format!(
                    "{mime_type} nested deeper than {} levels, keeping it opaque",
                    self.config.max_depth
                )),
            )?;
            let term = self.decode_leaf(q, &mut ent, src, rdr, &path, depth, false)?;
            return Ok((ent, term));
        }

        let term = if IDENTITY_ENCODINGS.contains(&encoding.as_str()) {
            match class {
                Classification::Multipart => {
                    self.parse_multipart(q, &mut ent, src, rdr, &path, depth)?
                }
                Classification::Message => {
                    self.parse_message(q, &mut ent, src, rdr, &path, depth)?
                }
                Classification::Singlepart => {
                    self.decode_leaf(q, &mut ent, src, rdr, &path, depth, true)?
                }
            }
        } else {
            let reparse = class != Classification::Singlepart
                && self.config.extract_encoded_containers
                && self.codecs.supports(&encoding);
            let redo = class == Classification::Singlepart;
            let term = self.decode_leaf(q, &mut ent, src, rdr, &path, depth, redo)?;
            if reparse {
                q.push(Task::Reparse {
                    path: path.clone(),
                    class,
                    depth,
                });
            }
            term
        };
        Ok((ent, term))
    }

    /// Parse the body of a `message/rfc822` (or similar) part as a complete
    /// message, then nest it or let it take the wrapper's place.
    fn parse_message<'a>(
        &mut self,
        q: &mut TaskQueue<Task<'a>>,
        ent: &mut Entity,
        src: &mut LineSource<'_>,
        rdr: &BoundaryReader,
        path: &[usize],
        depth: usize,
    ) -> Result<Terminator> {
        let replace = self.config.extract_nested_messages == NestedMessages::Replace;
        let inner_path = if replace {
            path.to_vec()
        } else {
            child_path(path, 0)
        };
        debug!(depth, replace, "Parsing nested message");

        let (inner, term) = self.parse_part(q, src, rdr, inner_path, depth + 1, None)?;
        if replace {
            *ent = inner;
        } else {
            ent.set_parts(vec![inner]);
        }
        Ok(term)
    }

    /// Boundary-driven part loop: preamble, parts, epilogue.
    fn parse_multipart<'a>(
        &mut self,
        q: &mut TaskQueue<Task<'a>>,
        ent: &mut Entity,
        src: &mut LineSource<'_>,
        rdr: &BoundaryReader,
        path: &[usize],
        depth: usize,
    ) -> Result<Terminator> {
        let boundary = match ent.head().multipart_boundary() {
            Some(b) if !b.is_empty() && !b.contains(['\r', '\n']) => b,
            found => {
                let problem = match found {
                    None => "multipart has no boundary",
                    Some(b) if b.is_empty() => "multipart boundary is empty",
                    Some(_) => "multipart boundary contains a line break",
                };
                self.recover(depth, MimeError::Structural(problem.to_string()))?;
                ent.set_effective_type(MimeType::unparseable_multipart());
                return self.decode_leaf(q, ent, src, rdr, path, depth, false);
            }
        };
        let inner = rdr.child(&boundary);
        let digest = ent.head().mime_type().subtype() == "digest";
        let retype = digest.then(MimeType::message_rfc822);
        debug!(depth, boundary = %boundary, "Parsing multipart");

        let mut buf = Vec::new();
        let term = inner.read_until_boundary(src, &mut buf)?;
        ent.set_preamble(split_lines(&buf));

        match term {
            Terminator::Delim => loop {
                let child = child_path(path, ent.num_parts());
                let (part, term) =
                    self.parse_part(q, src, &inner, child, depth + 1, retype.as_ref())?;
                ent.add_part(part);
                match term {
                    Terminator::Delim => {}
                    Terminator::Close => break,
                    Terminator::Eof => {
                        self.recover(
                            depth,
                            MimeError::Structural(format!(
                                "input ended before closing boundary \"{boundary}\""
                            )),
                        )?;
                        return Ok(Terminator::Eof);
                    }
                    Terminator::Outer => {
                        self.recover(
                            depth,
                            MimeError::Structural(format!(
                                "enclosing boundary found before closing boundary \"{boundary}\""
                            )),
                        )?;
                        return rdr.resolve_outer(src);
                    }
                }
            },
            Terminator::Close => {
                self.results.warn(depth, "Multipart has no parts");
            }
            Terminator::Eof | Terminator::Outer => {
                self.recover(
                    depth,
                    MimeError::Structural(format!(
                        "boundary \"{boundary}\" never appears in the multipart body"
                    )),
                )?;
                return if term == Terminator::Outer {
                    rdr.resolve_outer(src)
                } else {
                    Ok(Terminator::Eof)
                };
            }
        }

        buf.clear();
        let term = rdr.read_until_boundary(src, &mut buf)?;
        ent.set_epilogue(split_lines(&buf));
        Ok(term)
    }

    /// Decode the body as a leaf using the declared transfer encoding.
    #[allow(clippy::too_many_arguments)]
    fn decode_leaf<'a>(
        &mut self,
        q: &mut TaskQueue<Task<'a>>,
        ent: &mut Entity,
        src: &mut LineSource<'_>,
        rdr: &BoundaryReader,
        path: &[usize],
        depth: usize,
        redo: bool,
    ) -> Result<Terminator> {
        let encoding = ent.head().mime_encoding();
        let codec = match self.codecs.lookup(&encoding) {
            Some(codec) => codec,
            None => {
                let err = MimeError::UnsupportedEncoding(encoding.clone());
                self.results.warn(depth, format!("{err}, decoding as binary"));
                ent.set_effective_type(MimeType::octet_stream());
                self.codecs.best(&encoding)?
            }
        };

        let mut body = self.filer.new_output_body(ent.head())?;
        let (term, decoded) = {
            let mut out = body.open_write()?;
            let (term, decoded) = if rdr.has_declared_bounds() {
                let term = self
                    .scratch
                    .fill(|w| rdr.read_until_boundary(src, w))?;
                let decoded = {
                    let mut input = self.scratch.reader()?;
                    codec.decode(&mut *input, &mut *out)
                };
                (term, decoded)
            } else {
                let decoded = codec.decode(&mut *src, &mut *out);
                if decoded.is_err() {
                    io::copy(src, &mut io::sink())?;
                }
                (Terminator::Eof, decoded)
            };
            out.flush()?;
            (term, decoded)
        };
        if let Err(e) = decoded {
            self.recover(depth, e)?;
        }
        ent.set_body(body);

        if redo {
            q.push(Task::Redo {
                path: path.to_vec(),
                depth,
            });
        }
        Ok(term)
    }

    /// Re-read the decoded body of the encoded container at `path` and
    /// parse it as `class`, replacing the opaque leaf in place.
    pub fn reparse<'a>(
        &mut self,
        q: &mut TaskQueue<Task<'a>>,
        root: &mut Entity,
        path: &[usize],
        class: Classification,
        depth: usize,
    ) -> Result<()> {
        let slot = root
            .descendant_mut(path)
            .ok_or_else(|| MimeError::Internal(format!("no entity at {path:?} to re-parse")))?;
        let reader = slot
            .body()
            .ok_or_else(|| MimeError::Internal("encoded container has no decoded body".into()))?
            .reopen()?;
        let mut src = LineSource::new(reader);
        let rdr = BoundaryReader::new();
        debug!(depth, ?path, ?class, "Re-parsing decoded container");

        match class {
            Classification::Multipart => {
                let mut shell = Entity::new(slot.head().clone());
                shell.head_mut().set_mime_encoding("binary");
                self.parse_multipart(q, &mut shell, &mut src, &rdr, path, depth)?;
                self.discard_body(slot, depth);
                *slot = shell;
            }
            Classification::Message => {
                let replace = self.config.extract_nested_messages == NestedMessages::Replace;
                let inner_path = if replace {
                    path.to_vec()
                } else {
                    child_path(path, 0)
                };
                let (inner, _) = self.parse_part(q, &mut src, &rdr, inner_path, depth + 1, None)?;
                self.discard_body(slot, depth);
                if replace {
                    *slot = inner;
                } else {
                    slot.head_mut().set_mime_encoding("binary");
                    slot.set_parts(vec![inner]);
                }
            }
            Classification::Singlepart => {
                return Err(MimeError::Internal(
                    "re-parse requested for a single part".into(),
                ));
            }
        }
        Ok(())
    }

    /// Report `err`, then either keep going (tolerant mode, forgivable
    /// error) or return it.
    pub fn recover(&mut self, depth: usize, err: MimeError) -> Result<()> {
        if self.config.ignore_errors && err.is_forgivable() {
            self.results.warn(depth, err.to_string());
            Ok(())
        } else {
            self.results.error(depth, err.to_string());
            Err(err)
        }
    }

    fn empty_body(&mut self, head: &Header) -> Result<Body> {
        let mut body = self.filer.new_output_body(head)?;
        body.open_write()?.flush()?;
        Ok(body)
    }

    /// Drop the intermediate decoded bytes of a container that has just
    /// been re-parsed.
    fn discard_body(&mut self, slot: &mut Entity, depth: usize) {
        if let Some(mut old) = slot.take_body() {
            if let Err(e) = old.purge() {
                self.results
                    .warn(depth, format!("Could not remove decoded container: {e}"));
            }
        }
    }
}

/// Mailbox envelope lines and POP3 status lines that some agents leave in
/// front of a message.
fn is_bogus_line(line: &[u8]) -> bool {
    line.starts_with(b"From ") || line.starts_with(b"+OK")
}

fn child_path(path: &[usize], index: usize) -> EntityPath {
    let mut child = Vec::with_capacity(path.len() + 1);
    child.extend_from_slice(path);
    child.push(index);
    child
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InCoreFiler;

    struct Fixture {
        config: ParserConfig,
        codecs: CodecRegistry,
        filer: InCoreFiler,
        scratch: ScratchStore,
        results: ParseResults,
        last_head: Option<Header>,
    }

    impl Fixture {
        fn new(config: ParserConfig) -> Self {
            Self {
                config,
                codecs: CodecRegistry::default(),
                filer: InCoreFiler,
                scratch: ScratchStore::new(true),
                results: ParseResults::new(),
                last_head: None,
            }
        }

        fn engine(&mut self) -> Engine<'_> {
            Engine {
                config: &self.config,
                codecs: &self.codecs,
                filer: &mut self.filer,
                scratch: &mut self.scratch,
                results: &mut self.results,
                last_head: &mut self.last_head,
            }
        }

        fn parse(&mut self, data: &[u8]) -> Result<(Entity, Terminator, Vec<&'static str>)> {
            let mut q = TaskQueue::new();
            let mut src = LineSource::new(data);
            let (ent, term) =
                self.engine()
                    .parse_part(&mut q, &mut src, &BoundaryReader::new(), Vec::new(), 0, None)?;
            let mut names = Vec::new();
            while let Some((name, _)) = q.pop() {
                names.push(name);
            }
            Ok((ent, term, names))
        }
    }

    fn body_of(ent: &Entity) -> Vec<u8> {
        ent.body().unwrap().read_all().unwrap()
    }

    #[test]
    fn test_single_part() {
        let mut fx = Fixture::new(ParserConfig::default());
        let (ent, term, tasks) = fx.parse(b"Subject: hi\n\nbody text\n").unwrap();
        assert_eq!(term, Terminator::Eof);
        assert_eq!(body_of(&ent), b"body text\n");
        assert_eq!(tasks, vec!["redo"]);
        assert_eq!(fx.last_head.unwrap().get("subject"), Some("hi"));
    }

    #[test]
    fn test_bogus_lines_are_discarded() {
        let mut fx = Fixture::new(ParserConfig::default());
        let (ent, _, _) = fx
            .parse(b"+OK 120 octets\nFrom someone Mon Jan 1 00:00:00 2024\nSubject: x\n\nb\n")
            .unwrap();
        assert_eq!(ent.head().get("subject"), Some("x"));
        assert!(fx.results.has_warnings());
        assert!(!fx.results.has_errors());
    }

    #[test]
    fn test_multipart_with_preamble_and_epilogue() {
        let mut fx = Fixture::new(ParserConfig::default());
        let msg = b"Content-Type: multipart/mixed; boundary=XX\n\npre\n--XX\n\none\n--XX\nContent-Type: text/html\n\n<b>two</b>\n--XX--\npost\n";
        let (ent, term, tasks) = fx.parse(msg).unwrap();
        assert_eq!(term, Terminator::Eof);
        assert_eq!(ent.num_parts(), 2);
        assert_eq!(ent.preamble(), &[b"pre".to_vec()]);
        assert_eq!(ent.epilogue(), &[b"post\n".to_vec()]);
        assert_eq!(body_of(&ent.parts()[0]), b"one");
        assert_eq!(body_of(&ent.parts()[1]), b"<b>two</b>");
        assert_eq!(tasks, vec!["redo", "redo"]);
    }

    #[test]
    fn test_digest_parts_default_to_rfc822() {
        let mut fx = Fixture::new(ParserConfig::default());
        let msg = b"Content-Type: multipart/digest; boundary=D\n\n--D\n\nSubject: inner\n\nhello\n--D--\n";
        let (ent, _, _) = fx.parse(msg).unwrap();
        let part = &ent.parts()[0];
        assert_eq!(part.head().mime_type(), MimeType::message_rfc822());
        assert_eq!(part.num_parts(), 1);
        assert_eq!(part.parts()[0].head().get("subject"), Some("inner"));
        assert_eq!(body_of(&part.parts()[0]), b"hello");
    }

    #[test]
    fn test_missing_close_is_structural() {
        let msg = b"Content-Type: multipart/mixed; boundary=XX\n\n--XX\n\none\n";

        let mut fx = Fixture::new(ParserConfig::default());
        let (ent, _, _) = fx.parse(msg).unwrap();
        assert_eq!(ent.num_parts(), 1);
        assert!(fx.results.warnings().any(|d| d.message.contains("closing boundary")));

        let strict = ParserConfig {
            ignore_errors: false,
            ..ParserConfig::default()
        };
        let mut fx = Fixture::new(strict);
        assert!(matches!(fx.parse(msg), Err(MimeError::Structural(_))));
        assert!(fx.results.has_errors());
    }

    #[test]
    fn test_unterminated_header() {
        let mut fx = Fixture::new(ParserConfig::default());
        let (ent, term, _) = fx.parse(b"Subject: cut\n").unwrap();
        assert_eq!(term, Terminator::Eof);
        assert!(body_of(&ent).is_empty());
        assert!(fx.results.has_warnings());
    }

    #[test]
    fn test_header_leftovers_are_syntax_errors() {
        let strict = ParserConfig {
            ignore_errors: false,
            ..ParserConfig::default()
        };
        let mut fx = Fixture::new(strict);
        assert!(matches!(
            fx.parse(b"Subject: x\nnot a header\n\nbody\n"),
            Err(MimeError::Syntax(_))
        ));
        assert_eq!(fx.last_head.unwrap().get("subject"), Some("x"));
    }

    #[test]
    fn test_nested_outer_boundary_recovers() {
        // Inner multipart never closes; the outer close ends both.
        let msg = b"Content-Type: multipart/mixed; boundary=OUT\n\n--OUT\nContent-Type: multipart/alternative; boundary=IN\n\n--IN\n\ninner\n--OUT--\nepi\n";
        let mut fx = Fixture::new(ParserConfig::default());
        let (ent, _, _) = fx.parse(msg).unwrap();
        assert_eq!(ent.num_parts(), 1);
        let inner = &ent.parts()[0];
        assert_eq!(inner.num_parts(), 1);
        assert_eq!(body_of(&inner.parts()[0]), b"inner");
        assert_eq!(ent.epilogue(), &[b"epi\n".to_vec()]);
        assert!(fx.results.has_warnings());
    }

    #[test]
    fn test_depth_limit_keeps_container_opaque() {
        let config = ParserConfig {
            max_depth: 1,
            ..ParserConfig::default()
        };
        let mut fx = Fixture::new(config);
        let msg = b"Content-Type: multipart/mixed; boundary=A\n\n--A\nContent-Type: multipart/mixed; boundary=B\n\n--B\n\nx\n--B--\n--A--\n";
        let (ent, _, _) = fx.parse(msg).unwrap();
        let inner = &ent.parts()[0];
        assert!(!inner.is_container());
        assert_eq!(body_of(inner), b"--B\n\nx\n--B--");
        assert!(fx.results.warnings().any(|d| d.message.contains("nested deeper")));
    }

    #[test]
    fn test_encoded_container_enqueues_reparse() {
        let mut fx = Fixture::new(ParserConfig::default());
        let msg = b"Content-Type: multipart/mixed; boundary=XX\nContent-Transfer-Encoding: base64\n\nLS1YWAoKaGkKLS1YWC0tCg==\n";
        let (ent, _, tasks) = fx.parse(msg).unwrap();
        assert_eq!(tasks, vec!["reparse"]);
        assert_eq!(body_of(&ent), b"--XX\n\nhi\n--XX--\n");
    }

    #[test]
    fn test_opaque_container_gets_no_redo() {
        let mut fx = Fixture::new(ParserConfig {
            extract_encoded_containers: false,
            ..ParserConfig::default()
        });
        let msg = b"Content-Type: multipart/mixed; boundary=XX\nContent-Transfer-Encoding: base64\n\nLS1YWAoKaGkKLS1YWC0tCg==\n";
        let (ent, _, tasks) = fx.parse(msg).unwrap();
        assert!(tasks.is_empty());
        assert!(ent.parts().is_empty());
        assert_eq!(body_of(&ent), b"--XX\n\nhi\n--XX--\n");
    }

    #[test]
    fn test_encoded_leaf_gets_redo() {
        let mut fx = Fixture::new(ParserConfig::default());
        let msg = b"Content-Type: text/plain\nContent-Transfer-Encoding: base64\n\naGkK\n";
        let (ent, _, tasks) = fx.parse(msg).unwrap();
        assert_eq!(tasks, vec!["redo"]);
        assert_eq!(body_of(&ent), b"hi\n");
    }

    #[test]
    fn test_classification_is_reported_at_debug() {
        use crate::parser::results::Severity;

        let mut fx = Fixture::new(ParserConfig::default());
        fx.parse(b"Content-Type: text/plain\n\nbody\n").unwrap();
        let diag = &fx.results.diagnostics()[0];
        assert_eq!(diag.severity, Severity::Debug);
        assert_eq!(diag.depth, 0);
        assert!(diag.message.contains("text/plain"));
        assert!(diag.message.contains("Singlepart"));
        assert!(!fx.results.has_warnings());
    }

    #[test]
    fn test_unsupported_encoding_warning() {
        let mut fx = Fixture::new(ParserConfig::default());
        let (ent, _, tasks) = fx
            .parse(b"Content-Type: text/plain\nContent-Transfer-Encoding: x-gzip64\n\nabc\n")
            .unwrap();
        assert_eq!(tasks, vec!["redo"]);
        assert_eq!(ent.effective_type(), MimeType::octet_stream());
        assert_eq!(
            fx.results.warnings().next().map(|d| d.message.as_str()),
            Some("Unsupported transfer encoding: x-gzip64, decoding as binary")
        );
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path(&[], 0), vec![0]);
        assert_eq!(child_path(&[1, 2], 3), vec![1, 2, 3]);
    }
}
