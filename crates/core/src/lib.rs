#![forbid(unsafe_code)]

pub mod ids {
    /// Identity of a node in the coordination tree.
    ///
    /// Backed by the dense SQLite rowid; rendered as `#N` everywhere an agent
    /// or operator sees it.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct NodeId(i64);

    impl NodeId {
        pub fn from_raw(value: i64) -> Result<Self, NodeIdError> {
            if value <= 0 {
                return Err(NodeIdError::OutOfRange(value));
            }
            Ok(Self(value))
        }

        pub fn as_i64(self) -> i64 {
            self.0
        }

        /// Parses the `#N` rendering. A bare integer is accepted too so
        /// agents that strip the hash are not punished for it.
        pub fn parse(text: &str) -> Result<Self, NodeIdError> {
            let trimmed = text.trim();
            let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
            if digits.is_empty() {
                return Err(NodeIdError::Empty);
            }
            let value = digits
                .parse::<i64>()
                .map_err(|_| NodeIdError::NotANumber(trimmed.to_string()))?;
            Self::from_raw(value)
        }
    }

    impl std::fmt::Display for NodeId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "#{}", self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum NodeIdError {
        Empty,
        NotANumber(String),
        OutOfRange(i64),
    }

    impl std::fmt::Display for NodeIdError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "node id is empty"),
                Self::NotANumber(raw) => write!(f, "node id is not a number: {raw}"),
                Self::OutOfRange(value) => write!(f, "node id out of range: {value}"),
            }
        }
    }

    impl std::error::Error for NodeIdError {}
}

pub mod model {
    /// Closed node-kind vocabulary. `Goal` is reserved for the singleton root.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum NodeKind {
        Goal,
        Task,
        Serial,
        Ask,
    }

    impl NodeKind {
        pub fn as_str(self) -> &'static str {
            match self {
                NodeKind::Goal => "goal",
                NodeKind::Task => "task",
                NodeKind::Serial => "serial",
                NodeKind::Ask => "ask",
            }
        }

        pub fn parse(text: &str) -> Option<Self> {
            match text {
                "goal" => Some(NodeKind::Goal),
                "task" => Some(NodeKind::Task),
                "serial" => Some(NodeKind::Serial),
                "ask" => Some(NodeKind::Ask),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum NodeStatus {
        Pending,
        Active,
        Paused,
        Complete,
        Cancelled,
        Failed,
    }

    impl NodeStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                NodeStatus::Pending => "pending",
                NodeStatus::Active => "active",
                NodeStatus::Paused => "paused",
                NodeStatus::Complete => "complete",
                NodeStatus::Cancelled => "cancelled",
                NodeStatus::Failed => "failed",
            }
        }

        pub fn parse(text: &str) -> Option<Self> {
            match text {
                "pending" => Some(NodeStatus::Pending),
                "active" => Some(NodeStatus::Active),
                "paused" => Some(NodeStatus::Paused),
                "complete" => Some(NodeStatus::Complete),
                "cancelled" => Some(NodeStatus::Cancelled),
                "failed" => Some(NodeStatus::Failed),
                _ => None,
            }
        }

        pub fn is_terminal(self) -> bool {
            matches!(
                self,
                NodeStatus::Complete | NodeStatus::Cancelled | NodeStatus::Failed
            )
        }

        /// The full transition table. Everything outside it is rejected by
        /// the store with `invalid_status`; the one scheduler-only exception
        /// (the synthesis reset of a completed parent) bypasses this table
        /// through a dedicated store operation.
        pub fn can_transition(from: Self, to: Self) -> bool {
            use NodeStatus::*;
            matches!(
                (from, to),
                (Pending, Active)
                    | (Pending, Cancelled)
                    | (Pending, Failed)
                    | (Active, Complete)
                    | (Active, Failed)
                    | (Active, Paused)
                    | (Active, Cancelled)
                    | (Paused, Pending)
                    | (Paused, Cancelled)
            )
        }
    }

    /// Declared result contract. Never validated against the payload; the
    /// prompt assembler turns it into an output-format instruction.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Returns {
        Text,
        Boolean,
        List,
        Structured,
        File,
        Approval,
    }

    impl Returns {
        pub fn as_str(self) -> &'static str {
            match self {
                Returns::Text => "text",
                Returns::Boolean => "boolean",
                Returns::List => "list",
                Returns::Structured => "structured",
                Returns::File => "file",
                Returns::Approval => "approval",
            }
        }

        pub fn parse(text: &str) -> Option<Self> {
            match text {
                "text" => Some(Returns::Text),
                "boolean" => Some(Returns::Boolean),
                "list" => Some(Returns::List),
                "structured" => Some(Returns::Structured),
                "file" => Some(Returns::File),
                "approval" => Some(Returns::Approval),
                _ => None,
            }
        }
    }

    /// Routing of an `ask` node: who is expected to answer.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum AskTarget {
        Human,
        Parent,
        Children,
    }

    impl AskTarget {
        pub fn as_str(self) -> &'static str {
            match self {
                AskTarget::Human => "human",
                AskTarget::Parent => "parent",
                AskTarget::Children => "children",
            }
        }

        pub fn parse(text: &str) -> Option<Self> {
            match text {
                "human" => Some(AskTarget::Human),
                "parent" => Some(AskTarget::Parent),
                "children" => Some(AskTarget::Children),
                _ => None,
            }
        }
    }
}
