//  Copyright 2024 MrCroxx
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! A trivial generator that always returns the same value, generalized
//! from the per-numeric-width `Constant*Generator` family above to the
//! single [`Value`] type every Finch generator speaks. Not one of the
//! named built-ins in the generator factory — used internally
//! (tests, the `_` no-op's sibling cases) as a fixed-value stand-in
//! wherever a test needs a generator slot filled without randomness.

use super::Generator;
use crate::scope::RunCount;
use crate::value::{Format, Value};

#[derive(Debug, Clone)]
pub struct ConstantGenerator {
    val: Value,
}

impl ConstantGenerator {
    pub fn new(val: Value) -> Self {
        Self { val }
    }
}

impl Generator for ConstantGenerator {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn format(&self) -> Format {
        match self.val {
            Value::Int(_) => Format::new("%d"),
            _ => Format::new("'%s'"),
        }
    }

    fn values(&self, _rc: &RunCount) -> Vec<Value> {
        vec![self.val.clone()]
    }

    fn copy(&self) -> Box<dyn Generator> {
        Box::new(self.clone())
    }
}
