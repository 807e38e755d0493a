//! Compiled reference traversal.
//!
//! Graph loading only needs the object ids an entity refers to. Instead of dispatching per
//! member, a member sequence is compiled once into a short list of [`TraversalStep`]s:
//! primitive runs become one skip, reference runs become one bulk read, lists made purely of
//! references become one inlined reference array and lists without references are skipped by
//! their block length. Trailing steps that cannot yield references are cropped.

use crate::error::{Result, SwizzleError};
use crate::format::{ContentReader, REFERENCE_LENGTH};
use crate::graph::Oid;
use crate::layout::{MemberDescriptor, MemberKind};

/// One step of a compiled traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalStep {
    /// Skip a fixed number of bytes.
    Skip(usize),
    /// Read this many consecutive references.
    References(usize),
    /// A list whose element groups consist only of references: every 8-byte word of the
    /// body is an object id.
    ReferenceList,
    /// A list without references at any depth: skip the whole block.
    SkipList,
    /// A list of mixed element groups: run the nested steps once per group.
    Nested(Vec<TraversalStep>),
}

/// The compiled reference iterator of one layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferenceTraversal {
    steps: Vec<TraversalStep>,
}

impl ReferenceTraversal {
    /// Compiles the traversal for a member sequence.
    pub fn compile(members: &[MemberDescriptor]) -> Self {
        let mut steps = compile_steps(members);
        crop_to_references(&mut steps);
        Self { steps }
    }

    /// The compiled steps.
    pub fn steps(&self) -> &[TraversalStep] {
        &self.steps
    }

    /// True if the layout can contain references at all.
    pub fn has_references(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Number of references at the start of the content, before anything else.
    pub fn leading_references(&self) -> usize {
        match self.steps.first() {
            Some(TraversalStep::References(n)) => *n,
            _ => 0,
        }
    }

    /// Feeds every non-null object id encoded in `content` to `acceptor`.
    pub fn iterate(&self, content: &[u8], acceptor: &mut dyn FnMut(Oid)) -> Result<()> {
        if self.steps.is_empty() {
            return Ok(());
        }
        let mut reader = ContentReader::new(content);
        run_steps(&self.steps, &mut reader, acceptor)
    }
}

fn compile_steps(members: &[MemberDescriptor]) -> Vec<TraversalStep> {
    let mut steps: Vec<TraversalStep> = Vec::new();
    for member in members {
        let step = match &member.kind {
            MemberKind::Primitive(kind) => TraversalStep::Skip(kind.width()),
            MemberKind::Reference => TraversalStep::References(1),
            MemberKind::ScalarList(_) => TraversalStep::SkipList,
            MemberKind::ComplexList(nested) => {
                if !member.kind.has_references() {
                    TraversalStep::SkipList
                } else if nested.iter().all(|m| m.kind == MemberKind::Reference) {
                    TraversalStep::ReferenceList
                } else {
                    TraversalStep::Nested(compile_steps(nested))
                }
            }
        };
        push_merged(&mut steps, step);
    }
    steps
}

fn push_merged(steps: &mut Vec<TraversalStep>, step: TraversalStep) {
    match (steps.last_mut(), &step) {
        (Some(TraversalStep::Skip(n)), TraversalStep::Skip(m)) => *n += m,
        (Some(TraversalStep::References(n)), TraversalStep::References(m)) => *n += m,
        _ => steps.push(step),
    }
}

// Steps behind the last reference-yielding step never contribute; nested steps keep
// their trailing skips because the group width matters for the next iteration.
fn crop_to_references(steps: &mut Vec<TraversalStep>) {
    while let Some(last) = steps.last() {
        match last {
            TraversalStep::Skip(_) | TraversalStep::SkipList => {
                steps.pop();
            }
            _ => break,
        }
    }
}

fn run_steps(
    steps: &[TraversalStep],
    reader: &mut ContentReader<'_>,
    acceptor: &mut dyn FnMut(Oid),
) -> Result<()> {
    for step in steps {
        match step {
            TraversalStep::Skip(n) => reader.skip(*n)?,
            TraversalStep::References(n) => {
                for _ in 0..*n {
                    accept(reader.read_oid()?, acceptor);
                }
            }
            TraversalStep::ReferenceList => {
                let header = reader.read_list_header()?;
                let body = header.body_length() as usize;
                if body % REFERENCE_LENGTH != 0 {
                    return Err(SwizzleError::Format(format!(
                        "reference list body of {body} bytes is not a multiple of {REFERENCE_LENGTH}"
                    )));
                }
                for _ in 0..body / REFERENCE_LENGTH {
                    accept(reader.read_oid()?, acceptor);
                }
            }
            TraversalStep::SkipList => {
                reader.skip_list()?;
            }
            TraversalStep::Nested(nested) => {
                let header = reader.read_list_header()?;
                let end = reader.position() + header.body_length() as usize;
                for _ in 0..header.element_count {
                    run_steps(nested, reader, acceptor)?;
                }
                if reader.position() > end {
                    return Err(SwizzleError::Format(format!(
                        "nested list groups overran their block by {} bytes",
                        reader.position() - end
                    )));
                }
                reader.skip(end - reader.position())?;
            }
        }
    }
    Ok(())
}

fn accept(oid: Oid, acceptor: &mut dyn FnMut(Oid)) {
    if !oid.is_null() {
        acceptor(oid);
    }
}
