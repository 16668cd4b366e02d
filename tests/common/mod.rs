//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use spark_connect::{Component, PropValue, Props, ReducerStore};

#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub count: i64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Increment,
    Noop,
    Rename(String),
}

pub type AppStore = ReducerStore<AppState, Action>;

pub fn reducer(state: &Rc<AppState>, action: &Action) -> Rc<AppState> {
    match action {
        Action::Noop => Rc::clone(state),
        Action::Increment => Rc::new(AppState {
            count: state.count + 1,
            label: state.label.clone(),
        }),
        Action::Rename(label) => Rc::new(AppState {
            count: state.count,
            label: label.clone(),
        }),
    }
}

pub fn app_store(count: i64) -> Rc<AppStore> {
    ReducerStore::new(
        AppState {
            count,
            label: String::from("start"),
        },
        reducer,
    )
}

/// Shared call counter.
#[derive(Clone, Default)]
pub struct Counter(Rc<Cell<usize>>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self) {
        self.0.set(self.0.get() + 1);
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}

/// Component that echoes its props and counts renders.
pub struct Echo {
    pub renders: Counter,
}

impl Echo {
    pub fn new() -> (Self, Counter) {
        let renders = Counter::new();
        (Self { renders: renders.clone() }, renders)
    }
}

impl Component for Echo {
    type Output = Props;

    fn render(&self, props: &Props) -> Props {
        self.renders.bump();
        props.clone()
    }

    fn display_name(&self) -> &str {
        "Echo"
    }
}

pub fn int(props: &Props, key: &str) -> Option<i64> {
    props.get(key).and_then(PropValue::as_int)
}
