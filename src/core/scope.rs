//! Loop scopes - per-iteration bindings visible to template resolution

use serde_json::Value;

/// One frame of loop state
///
/// `current_value` and `key` are optional so that a frame which only binds a
/// key (e.g. while a transform walks its `keys`) does not hide the value bound
/// by an enclosing loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopScope {
    /// Name of the loop that opened this frame (step type or array path)
    pub loop_id: String,

    /// Index of the current iteration
    pub index: usize,

    /// Item bound to `_loop`
    pub current_value: Option<Value>,

    /// Path bound to `_key`
    pub key: Option<String>,

    /// Where `current_value` lives in the context data, if it came from there
    pub item_path: Option<String>,
}

impl LoopScope {
    /// A frame without any bindings yet
    pub fn new(loop_id: impl Into<String>) -> Self {
        Self {
            loop_id: loop_id.into(),
            index: 0,
            current_value: None,
            key: None,
            item_path: None,
        }
    }

    /// A frame for one iteration over an array
    pub fn iteration(
        loop_id: impl Into<String>,
        index: usize,
        value: Value,
        item_path: Option<String>,
    ) -> Self {
        Self {
            loop_id: loop_id.into(),
            index,
            current_value: Some(value),
            key: None,
            item_path,
        }
    }
}

/// Chain of active loop scopes, innermost first
///
/// A child scope borrows its parent, so leaving an iteration (normally, by `?`
/// or by panic) drops the child and restores the parent bindings.
#[derive(Debug)]
pub struct Scope<'p> {
    frame: Option<LoopScope>,
    parent: Option<&'p Scope<'p>>,
}

impl Scope<'static> {
    /// The top-level scope of a run; has no bindings
    pub fn root() -> Self {
        Scope {
            frame: None,
            parent: None,
        }
    }
}

impl<'p> Scope<'p> {
    /// Open a nested scope with the given frame
    pub fn child(&self, frame: LoopScope) -> Scope<'_> {
        Scope {
            frame: Some(frame),
            parent: Some(self),
        }
    }

    /// Number of frames on the chain
    pub fn depth(&self) -> usize {
        let own = usize::from(self.frame.is_some());
        own + self.parent.map_or(0, |p| p.depth())
    }

    /// The innermost frame, if any
    pub fn current(&self) -> Option<&LoopScope> {
        self.frames().next()
    }

    /// Frames from innermost to outermost
    pub fn frames(&self) -> Frames<'_> {
        Frames { next: Some(self) }
    }

    /// Index of the innermost loop
    pub fn index(&self) -> Option<usize> {
        self.current().map(|f| f.index)
    }

    /// Innermost frame that binds a loop value
    pub fn value_frame(&self) -> Option<&LoopScope> {
        self.frames().find(|f| f.current_value.is_some())
    }

    /// Innermost bound key path
    pub fn key(&self) -> Option<&str> {
        self.frames().find_map(|f| f.key.as_deref())
    }

    /// Register the current index and value in this scope's frame
    pub fn save_loop(&mut self, index: usize, value: Value) {
        let frame = self.frame.get_or_insert_with(|| LoopScope::new("loop"));
        frame.index = index;
        frame.current_value = Some(value);
        frame.item_path = None;
    }

    /// Register the current index and key path in this scope's frame
    pub fn save_loop_key(&mut self, index: usize, key: impl Into<String>) {
        let frame = self.frame.get_or_insert_with(|| LoopScope::new("keys"));
        frame.index = index;
        frame.key = Some(key.into());
    }
}

/// Iterator over the frames of a scope chain
pub struct Frames<'a> {
    next: Option<&'a Scope<'a>>,
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a LoopScope;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(scope) = self.next {
            self.next = scope.parent;
            if let Some(frame) = &scope.frame {
                return Some(frame);
            }
        }
        None
    }
}
