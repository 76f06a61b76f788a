//! Remote command catalog expressed as a small grammar AST.
//!
//! The parser and the `HELP` command interpret the same structure, so
//! keywords, operands and usage lines stay in sync.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandTag {
    Store,
    Read,
    Calibrate,
    CompareTest,
    BackEmf,
    CurrentSweep,
    Exit,
    Status,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChoiceTag {
    Default,
    All,
    On,
    Off,
    Check,
    Diagnostics,
}

/// Meaning of an integer operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegerTag {
    Slot,
    Milliamps,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub grammar: &'static Node,
    pub usage: &'static str,
    pub summary: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    End,
    /// One keyword out of a fixed set. Optional choices may be omitted.
    Choice {
        choices: &'static [ChoiceBranch],
        required: bool,
    },
    /// An integer operand, or one of the keyword alternatives in its place.
    Integer {
        tag: IntegerTag,
        alternatives: &'static [ChoiceBranch],
        next: &'static Node,
    },
    /// Optional free-form command name.
    Topic { next: &'static Node },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChoiceBranch {
    pub keyword: &'static str,
    pub tag: ChoiceTag,
    pub next: &'static Node,
}

const END: Node = Node::End;

const STORE_VALUE_ALTERNATIVES: [ChoiceBranch; 1] = [ChoiceBranch {
    keyword: "default",
    tag: ChoiceTag::Default,
    next: &END,
}];

const STORE_VALUE: Node = Node::Integer {
    tag: IntegerTag::Milliamps,
    alternatives: &STORE_VALUE_ALTERNATIVES,
    next: &END,
};

const STORE_GRAMMAR: Node = Node::Integer {
    tag: IntegerTag::Slot,
    alternatives: &[],
    next: &STORE_VALUE,
};

const READ_ALTERNATIVES: [ChoiceBranch; 1] = [ChoiceBranch {
    keyword: "all",
    tag: ChoiceTag::All,
    next: &END,
}];

const READ_GRAMMAR: Node = Node::Integer {
    tag: IntegerTag::Slot,
    alternatives: &READ_ALTERNATIVES,
    next: &END,
};

const COMPARE_GRAMMAR: Node = Node::Integer {
    tag: IntegerTag::Milliamps,
    alternatives: &[],
    next: &END,
};

const BACK_EMF_CHOICES: [ChoiceBranch; 3] = [
    ChoiceBranch {
        keyword: "on",
        tag: ChoiceTag::On,
        next: &END,
    },
    ChoiceBranch {
        keyword: "off",
        tag: ChoiceTag::Off,
        next: &END,
    },
    ChoiceBranch {
        keyword: "check",
        tag: ChoiceTag::Check,
        next: &END,
    },
];

const BACK_EMF_GRAMMAR: Node = Node::Choice {
    choices: &BACK_EMF_CHOICES,
    required: true,
};

const EXIT_CHOICES: [ChoiceBranch; 1] = [ChoiceBranch {
    keyword: "diagnostics",
    tag: ChoiceTag::Diagnostics,
    next: &END,
}];

const EXIT_GRAMMAR: Node = Node::Choice {
    choices: &EXIT_CHOICES,
    required: false,
};

const HELP_GRAMMAR: Node = Node::Topic { next: &END };

const COMMANDS: [CommandSpec; 9] = [
    CommandSpec {
        name: "store",
        tag: CommandTag::Store,
        grammar: &STORE_GRAMMAR,
        usage: "STORE <slot> <mA>|DEFAULT",
        summary: "write a preset or select the default slot",
    },
    CommandSpec {
        name: "read",
        tag: CommandTag::Read,
        grammar: &READ_GRAMMAR,
        usage: "READ <slot>|ALL",
        summary: "report stored presets and the default slot",
    },
    CommandSpec {
        name: "calibrate",
        tag: CommandTag::Calibrate,
        grammar: &END,
        usage: "CALIBRATE",
        summary: "apply the maximum limit and report the reference voltage",
    },
    CommandSpec {
        name: "comp_test",
        tag: CommandTag::CompareTest,
        grammar: &COMPARE_GRAMMAR,
        usage: "COMP_TEST <mA>",
        summary: "apply a limit and watch the comparator",
    },
    CommandSpec {
        name: "back_emf",
        tag: CommandTag::BackEmf,
        grammar: &BACK_EMF_GRAMMAR,
        usage: "BACK_EMF ON|OFF|CHECK",
        summary: "set, clear or report the countermeasure flag",
    },
    CommandSpec {
        name: "current_sweep",
        tag: CommandTag::CurrentSweep,
        grammar: &END,
        usage: "CURRENT_SWEEP",
        summary: "step the limit up until the comparator trips",
    },
    CommandSpec {
        name: "exit",
        tag: CommandTag::Exit,
        grammar: &EXIT_GRAMMAR,
        usage: "EXIT [DIAGNOSTICS]",
        summary: "leave the session, optionally with the load disabled",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        grammar: &END,
        usage: "STATUS",
        summary: "report mode, limit, slots and trip count",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        grammar: &HELP_GRAMMAR,
        usage: "HELP [command]",
        summary: "list commands",
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(find("COMP_TEST").map(|spec| spec.tag), Some(CommandTag::CompareTest));
        assert_eq!(find("Back_Emf").map(|spec| spec.tag), Some(CommandTag::BackEmf));
        assert!(find("reboot").is_none());
    }

    #[test]
    fn usage_lines_start_with_the_command_name() {
        for spec in commands() {
            let head = &spec.usage[..spec.name.len()];
            assert!(head.eq_ignore_ascii_case(spec.name), "{}", spec.name);
        }
    }
}
