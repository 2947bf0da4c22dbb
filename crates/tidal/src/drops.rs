//! Loop-state drops and the iterator the VM drives them with.
//!
//! A drop is a lightweight object exposed to templates under a well-known
//! name (`forloop`, `tablerowloop`) with a fixed attribute set. The VM owns
//! one drop per active loop; the same drop is visible from the loop's block
//! slot and from the extension frame pushed onto the render context, so a
//! partial included inside a loop still resolves `forloop`.
//!
//! Counters advance by stepping the drop before each iteration, never after,
//! so `first` is true exactly while the first body renders.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::Value;

/// Helper state for a `for` loop, exposed to templates as `forloop`.
#[derive(Debug)]
pub struct ForLoopDrop {
    /// Loop identification, e.g. `"tag-product.tags"`.
    name: String,
    length: usize,
    /// Zero-based index of the current iteration; -1 before the first step.
    index0: i64,
    item: Value,
    parentloop: Option<Value>,
}

impl ForLoopDrop {
    /// Creates a drop for a loop of `length` items.
    ///
    /// `parentloop` is the drop of the immediately enclosing `for` loop, if
    /// any. The drop yields nothing until the first [`Self::step`].
    #[must_use]
    pub fn new(name: String, length: usize, parentloop: Option<Value>) -> Self {
        Self {
            name,
            length,
            index0: -1,
            item: Value::Nil,
            parentloop,
        }
    }

    /// Advances the drop to the next item.
    pub fn step(&mut self, item: Value) {
        self.index0 += 1;
        self.item = item;
    }

    /// The current loop item, also bound to the loop variable name.
    #[must_use]
    pub fn item(&self) -> Value {
        self.item.clone()
    }

    /// Attribute lookup, backing `forloop.<name>` access.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let length = self.length as i64;
        match key {
            "length" => Some(Value::Int(length)),
            "index" => Some(Value::Int(self.index0 + 1)),
            "index0" => Some(Value::Int(self.index0)),
            "rindex" => Some(Value::Int(length - self.index0)),
            "rindex0" => Some(Value::Int(length - self.index0 - 1)),
            "first" => Some(Value::Bool(self.index0 == 0)),
            "last" => Some(Value::Bool(length - self.index0 - 1 == 0)),
            "name" => Some(Value::str(&self.name)),
            "parentloop" => Some(
                self.parentloop
                    .clone()
                    .unwrap_or_else(|| Value::undefined("parentloop")),
            ),
            _ => None,
        }
    }
}

/// Helper state for a `tablerow` loop, exposed as `tablerowloop`.
///
/// Besides the counters shared with `forloop`, a tablerow drop tracks the
/// current row and column, and writes the `<tr>`/`<td>` markup around each
/// cell as the VM steps it.
#[derive(Debug)]
pub struct TableRowDrop {
    name: String,
    length: usize,
    cols: usize,
    index0: i64,
    item: Value,
}

impl TableRowDrop {
    /// Creates a drop for `length` items laid out `cols` per row.
    #[must_use]
    pub fn new(name: String, length: usize, cols: usize) -> Self {
        Self {
            name,
            length,
            cols: cols.max(1),
            index0: -1,
            item: Value::Nil,
        }
    }

    /// Advances to the next item and writes the markup that precedes its
    /// cell: the row opener for the first item, `</td>` plus an optional row
    /// break for every later one.
    pub fn step_write(&mut self, item: Value, buf: &mut String) {
        self.index0 += 1;
        self.item = item;
        let index0 = usize::try_from(self.index0).unwrap_or(0);
        if index0 == 0 {
            buf.push_str("<tr class=\"row1\">\n");
        } else {
            buf.push_str("</td>");
            if index0 % self.cols == 0 {
                let row = index0 / self.cols + 1;
                buf.push_str("</tr>\n<tr class=\"row");
                buf.push_str(&row.to_string());
                buf.push_str("\">");
            }
        }
        let col = index0 % self.cols + 1;
        buf.push_str("<td class=\"col");
        buf.push_str(&col.to_string());
        buf.push_str("\">");
    }

    /// Writes the markup that closes the final cell and row.
    pub fn exit_write(&self, buf: &mut String) {
        if self.index0 >= 0 {
            buf.push_str("</td></tr>\n");
        }
    }

    /// The current loop item.
    #[must_use]
    pub fn item(&self) -> Value {
        self.item.clone()
    }

    /// Attribute lookup, backing `tablerowloop.<name>` access.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let length = self.length as i64;
        let cols = self.cols as i64;
        let col0 = self.index0.rem_euclid(cols);
        match key {
            "length" => Some(Value::Int(length)),
            "index" => Some(Value::Int(self.index0 + 1)),
            "index0" => Some(Value::Int(self.index0)),
            "rindex" => Some(Value::Int(length - self.index0)),
            "rindex0" => Some(Value::Int(length - self.index0 - 1)),
            "first" => Some(Value::Bool(self.index0 == 0)),
            "last" => Some(Value::Bool(length - self.index0 - 1 == 0)),
            "col" => Some(Value::Int(col0 + 1)),
            "col0" => Some(Value::Int(col0)),
            "col_first" => Some(Value::Bool(col0 == 0)),
            "col_last" => Some(Value::Bool(col0 == cols - 1)),
            "row" => Some(Value::Int(self.index0 / cols + 1)),
            "name" => Some(Value::str(&self.name)),
            _ => None,
        }
    }
}

/// The drop a [`LoopIter`] advances on each step.
#[derive(Debug)]
pub enum LoopDrop {
    For(Rc<RefCell<ForLoopDrop>>),
    Table(Rc<RefCell<TableRowDrop>>),
}

/// An active loop iterator, living on the VM stack while its loop runs.
///
/// The iteration window (`offset`, `limit`, `reversed`) is materialized once
/// at loop entry, so the drop knows the total length up front.
#[derive(Debug)]
pub struct LoopIter {
    items: Vec<Value>,
    pos: usize,
    drop: LoopDrop,
}

impl LoopIter {
    /// Creates an iterator over already windowed items.
    #[must_use]
    pub fn new(items: Vec<Value>, drop: LoopDrop) -> Self {
        Self { items, pos: 0, drop }
    }

    /// Advances the iterator, stepping the drop and writing any tablerow
    /// markup into `buf`. Returns `None` on exhaustion, after writing the
    /// closing tablerow markup.
    pub fn step(&mut self, buf: &mut String) -> Option<Value> {
        if self.pos >= self.items.len() {
            if let LoopDrop::Table(drop) = &self.drop {
                drop.borrow().exit_write(buf);
            }
            return None;
        }
        let item = self.items[self.pos].clone();
        self.pos += 1;
        match &self.drop {
            LoopDrop::For(drop) => drop.borrow_mut().step(item.clone()),
            LoopDrop::Table(drop) => drop.borrow_mut().step_write(item.clone(), buf),
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn attr_int(drop: &ForLoopDrop, key: &str) -> i64 {
        drop.get(key).unwrap().as_int().unwrap()
    }

    #[test]
    fn forloop_counters() {
        let mut drop = ForLoopDrop::new("i-(1..3)".to_string(), 3, None);
        drop.step(Value::Int(1));
        assert_eq!(attr_int(&drop, "index"), 1);
        assert_eq!(attr_int(&drop, "index0"), 0);
        assert_eq!(attr_int(&drop, "rindex"), 3);
        assert_eq!(attr_int(&drop, "rindex0"), 2);
        assert!(drop.get("first").unwrap().is_truthy());
        assert!(!drop.get("last").unwrap().is_truthy());

        drop.step(Value::Int(2));
        drop.step(Value::Int(3));
        assert_eq!(attr_int(&drop, "index"), 3);
        assert_eq!(attr_int(&drop, "rindex"), 1);
        assert!(!drop.get("first").unwrap().is_truthy());
        assert!(drop.get("last").unwrap().is_truthy());
    }

    #[test]
    fn missing_parentloop_is_undefined() {
        let drop = ForLoopDrop::new("i-(1..1)".to_string(), 1, None);
        assert!(drop.get("parentloop").unwrap().is_undefined());
    }

    #[test]
    fn tablerow_markup() {
        let drop = Rc::new(RefCell::new(TableRowDrop::new("i-(1..4)".to_string(), 4, 2)));
        let items: Vec<Value> = (1..=4).map(Value::Int).collect();
        let mut iter = LoopIter::new(items, LoopDrop::Table(Rc::clone(&drop)));

        let mut buf = String::new();
        while let Some(item) = iter.step(&mut buf) {
            item.render_to(&mut buf);
        }
        assert_eq!(
            buf,
            "<tr class=\"row1\">\n<td class=\"col1\">1</td><td class=\"col2\">2</td></tr>\n\
             <tr class=\"row2\"><td class=\"col1\">3</td><td class=\"col2\">4</td></tr>\n"
        );
    }

    #[test]
    fn tablerow_column_attributes() {
        let mut drop = TableRowDrop::new("n".to_string(), 4, 2);
        let mut buf = String::new();
        drop.step_write(Value::Int(1), &mut buf);
        assert_eq!(drop.get("col").unwrap().as_int(), Some(1));
        assert!(drop.get("col_first").unwrap().is_truthy());
        drop.step_write(Value::Int(2), &mut buf);
        assert!(drop.get("col_last").unwrap().is_truthy());
        assert_eq!(drop.get("row").unwrap().as_int(), Some(1));
        drop.step_write(Value::Int(3), &mut buf);
        assert_eq!(drop.get("row").unwrap().as_int(), Some(2));
        assert_eq!(drop.get("col").unwrap().as_int(), Some(1));
    }
}
