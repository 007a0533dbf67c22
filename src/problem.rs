use std::io::{BufRead, Write};

/// The inconsistencies the checker knows how to ask about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProblemCode {
    /// has-journal is set, but the superblock names an external journal
    /// device.
    JournalUnsuppDev,
    /// has-journal is set, but the superblock names an external journal
    /// UUID.
    JournalUnsuppUuid,
    /// has-journal is clear, but an external journal device field is set.
    JournalBadDev,
    /// has-journal is clear, but the journal UUID is non-zero.
    JournalBadUuid,
    /// The journal inode fails structural validation.
    JournalBadInode,
    /// needs-recovery is set, but there is no journal to recover from.
    JournalRecoverSet,
    /// The journal superblock is structurally corrupt.
    JournalBadSuper,
    /// The journal superblock has an unrecognised format.
    JournalUnsuppSuper,
    /// has-journal is clear, but a valid journal is present.
    JournalHasJournal,
    /// needs-recovery is clear, but the journal has data.
    JournalResetJournal,
}

impl ProblemCode {
    /// The inconsistency, as reported to the user.
    pub fn message(&self) -> &'static str
    {
        match self {
            Self::JournalUnsuppDev =>
                "superblock says the file system has an external journal device (unsupported)",
            Self::JournalUnsuppUuid =>
                "superblock says the file system has an external journal (unsupported)",
            Self::JournalBadDev =>
                "superblock has an external journal device set, but no journal feature",
            Self::JournalBadUuid =>
                "superblock has a journal UUID set, but no journal feature",
            Self::JournalBadInode =>
                "file system has an invalid journal inode",
            Self::JournalRecoverSet =>
                "superblock has the recovery flag set, but no journal",
            Self::JournalBadSuper =>
                "journal superblock is corrupt",
            Self::JournalUnsuppSuper =>
                "journal superblock has an unrecognised format",
            Self::JournalHasJournal =>
                "superblock says the file system has no journal, but a journal is present",
            Self::JournalResetJournal =>
                "recovery flag is clear, but the journal has data",
        }
    }

    /// The proposed fix, posed as a yes/no question.
    pub fn prompt(&self) -> &'static str
    {
        match self {
            Self::JournalUnsuppDev
            | Self::JournalUnsuppUuid
            | Self::JournalBadDev
            | Self::JournalBadUuid => "Clear the external journal fields",
            Self::JournalBadInode => "Clear the journal inode",
            Self::JournalRecoverSet => "Clear the recovery flag",
            Self::JournalBadSuper => "Rewrite the journal superblock",
            Self::JournalUnsuppSuper => "Abort",
            Self::JournalHasJournal => "Delete the journal",
            Self::JournalResetJournal => "Reset the journal",
        }
    }

    /// Whether the fix may be applied without asking in preen mode.
    /// The destructive or judgement-call fixes want a human.
    pub fn preen_ok(&self) -> bool
    {
        !matches!(
            self,
            Self::JournalBadSuper
                | Self::JournalUnsuppSuper
                | Self::JournalHasJournal
                | Self::JournalResetJournal
        )
    }
}


/// Extra data attached to a problem report.
#[derive(Clone, Debug, Default)]
pub struct ProblemContext {
    /// An optional numeric datum (a device number, a block count, ...).
    pub num: u64,
    /// An optional string datum (a rendered UUID, ...).
    pub str: Option<String>,
    /// The inode under discussion, if any.
    pub ino: u32,
}


/// How prompts are answered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FixPolicy {
    /// Ask on the terminal.
    Ask,
    /// Assume yes everywhere.
    Yes,
    /// Assume no everywhere.
    No,
    /// Apply safe fixes silently, decline the rest.
    Preen,
}


/// The channel through which inconsistencies are posed as yes/no questions.
/// Returns whether the proposed fix is accepted.
pub trait Reporter {
    fn ask(&mut self, code: ProblemCode, pctx: &ProblemContext) -> bool;
}


/// A reporter driven by the command-line fix policy, prompting on the
/// terminal when the policy is `Ask`.
#[derive(Debug)]
pub struct CliReporter {
    policy: FixPolicy,
}

impl CliReporter {
    pub fn new(policy: FixPolicy) -> Self
    {
        Self { policy }
    }

    fn describe(&self, code: ProblemCode, pctx: &ProblemContext)
    {
        print!("{}", code.message());
        if pctx.ino != 0 {
            print!(" (inode {})", pctx.ino);
        }
        if let Some(s) = &pctx.str {
            print!(" ({})", s);
        } else if pctx.num != 0 {
            print!(" ({})", pctx.num);
        }
        println!();
    }
}

impl Reporter for CliReporter {
    fn ask(&mut self, code: ProblemCode, pctx: &ProblemContext) -> bool
    {
        self.describe(code, pctx);

        let answer = match self.policy {
            FixPolicy::Yes => true,
            FixPolicy::No => false,
            FixPolicy::Preen => code.preen_ok(),
            FixPolicy::Ask => {
                print!("{}? (y/n) ", code.prompt());
                let _ = std::io::stdout().flush();

                let mut line = String::new();
                match std::io::stdin().lock().read_line(&mut line) {
                    Ok(0) | Err(_) => false,
                    Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
                }
            }
        };

        match self.policy {
            FixPolicy::Ask => (),
            _ => println!("{}? {}", code.prompt(), if answer { "yes" } else { "no" }),
        }

        answer
    }
}


/// A reporter fed from a canned list of answers, recording what was asked.
#[cfg(test)]
pub struct ScriptedReporter {
    pub answers: std::collections::VecDeque<bool>,
    pub asked: std::rc::Rc<std::cell::RefCell<Vec<ProblemCode>>>,
}

#[cfg(test)]
impl ScriptedReporter {
    pub fn new(answers: &[bool]) -> (Self, std::rc::Rc<std::cell::RefCell<Vec<ProblemCode>>>)
    {
        let asked = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let reporter = Self {
            answers: answers.iter().copied().collect(),
            asked: asked.clone(),
        };

        (reporter, asked)
    }
}

#[cfg(test)]
impl Reporter for ScriptedReporter {
    fn ask(&mut self, code: ProblemCode, _pctx: &ProblemContext) -> bool
    {
        self.asked.borrow_mut().push(code);
        self.answers.pop_front().unwrap_or(false)
    }
}
