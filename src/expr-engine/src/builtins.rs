// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use lazy_static::lazy_static;

/// A named elementwise function.  Two handles are the same function iff
/// their names match, which is what lets function nodes participate in
/// structural identity.
#[derive(Copy, Clone)]
pub struct FuncHandle {
    name: &'static str,
    func: fn(f64) -> f64,
}

impl FuncHandle {
    pub const fn new(name: &'static str, func: fn(f64) -> f64) -> Self {
        FuncHandle { name, func }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline(always)]
    pub fn call(&self, x: f64) -> f64 {
        (self.func)(x)
    }
}

impl PartialEq for FuncHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for FuncHandle {}

impl Hash for FuncHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state)
    }
}

impl fmt::Debug for FuncHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FuncHandle({})", self.name)
    }
}

impl fmt::Display for FuncHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

lazy_static! {
    static ref BUILTINS: HashMap<&'static str, FuncHandle> = {
        let funcs: [FuncHandle; 13] = [
            FuncHandle::new("exp", f64::exp),
            FuncHandle::new("log", f64::ln),
            FuncHandle::new("log10", f64::log10),
            FuncHandle::new("sqrt", f64::sqrt),
            FuncHandle::new("sin", f64::sin),
            FuncHandle::new("cos", f64::cos),
            FuncHandle::new("tan", f64::tan),
            FuncHandle::new("sinh", f64::sinh),
            FuncHandle::new("cosh", f64::cosh),
            FuncHandle::new("tanh", f64::tanh),
            FuncHandle::new("arcsinh", f64::asinh),
            FuncHandle::new("arctan", f64::atan),
            FuncHandle::new("sigmoid", sigmoid),
        ];
        funcs.into_iter().map(|f| (f.name, f)).collect()
    };
}

/// Looks up a builtin elementwise function by name.
pub fn lookup(name: &str) -> Option<FuncHandle> {
    BUILTINS.get(name).copied()
}

#[test]
fn test_lookup() {
    let exp = lookup("exp").unwrap();
    assert_eq!("exp", exp.name());
    assert_eq!(1.0, exp.call(0.0));
    assert_eq!(0.5, lookup("sigmoid").unwrap().call(0.0));
    assert!(lookup("erf").is_none());
}

#[test]
fn test_identity_by_name() {
    let a = FuncHandle::new("exp", f64::exp);
    let b = lookup("exp").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, lookup("log").unwrap());
}
