use bytes::Bytes;
use std::fmt;

/// Query is a single store command, i.e. an ordered sequence of byte-string arguments. It is
/// immutable once built and owned by whichever queue entry holds it until it's written.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Query {
    args: Vec<Bytes>,
}

pub type Queries = Vec<Query>;

// Limits applied when rendering a query for log messages.
const LOGGED_ARGS_MAX: usize = 7;
const LOGGED_ARG_LEN_MAX: usize = 64;
const LOGGED_ARG_CUT: usize = 61;

impl Query {
    pub fn new<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        Query {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn into_args(self) -> Vec<Bytes> {
        self.args
    }

    /// The command name, e.g. `HSET`.
    pub fn command(&self) -> Option<&[u8]> {
        self.args.first().map(|a| a.as_ref())
    }
}

impl<A: Into<Bytes>> From<Vec<A>> for Query {
    fn from(args: Vec<A>) -> Self {
        Query::new(args)
    }
}

/// Renders an abbreviated form suitable for log lines: at most 7 args, long args cut short.
impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if i == LOGGED_ARGS_MAX {
                return f.write_str("...");
            }

            let text = String::from_utf8_lossy(arg);
            if arg.len() > LOGGED_ARG_LEN_MAX {
                let cut: String = text.chars().take(LOGGED_ARG_CUT).collect();
                write!(f, "'{}...'", cut)?;
            } else {
                write!(f, "'{}'", text)?;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query[{}]", self)
    }
}

/// Wraps `queries` into a single `MULTI` ... `EXEC` transaction. Empty input stays empty.
pub fn transaction(queries: Queries) -> Queries {
    if queries.is_empty() {
        return queries;
    }

    let mut wrapped = Vec::with_capacity(queries.len() + 2);
    wrapped.push(Query::new(vec!["MULTI"]));
    wrapped.extend(queries);
    wrapped.push(Query::new(vec!["EXEC"]));
    wrapped
}

/// Which logical domains a write item's effects belong to. Only used for metrics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryAffects {
    pub config: usize,
    pub state: usize,
    pub history: usize,
}

impl QueryAffects {
    pub fn new(config: usize, state: usize, history: usize) -> Self {
        QueryAffects { config, state, history }
    }

    pub fn config(count: usize) -> Self {
        Self::new(count, 0, 0)
    }

    pub fn state(count: usize) -> Self {
        Self::new(0, count, 0)
    }

    pub fn history(count: usize) -> Self {
        Self::new(0, 0, count)
    }
}

/// Write queue classes. Every queued `High` item is written before any `Normal` one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryPriority {
    High,
    Normal,
}

impl Default for QueryPriority {
    fn default() -> Self {
        QueryPriority::Normal
    }
}
