//! Combining two descriptors.

use super::*;

fn right_wins<T: Clone>(left: &mut Option<T>, right: &Option<T>) {
    if let Some(value) = right {
        *left = Some(value.clone());
    }
}

fn merge_keyed<T: Clone>(left: &mut Vec<(String, T)>, right: &[(String, T)]) {
    for (key, value) in right {
        match left.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.clone(),
            None => left.push((key.clone(), value.clone())),
        }
    }
}

impl Query {
    /// Merge `other` into this query.
    ///
    /// Scalars set on `other` win; clause lists are concatenated left then
    /// right; keyed maps (parsers, defaults, shapes, scopes) are merged with
    /// `other` overriding; flags are OR-ed. `other` is only read.
    pub fn merge(mut self, other: &Query) -> Self {
        right_wins(&mut self.table, &other.table);
        right_wins(&mut self.schema, &other.schema);
        right_wins(&mut self.as_, &other.as_);
        right_wins(&mut self.from, &other.from);
        right_wins(&mut self.limit, &other.limit);
        right_wins(&mut self.offset, &other.offset);
        right_wins(&mut self.lock, &other.lock);
        right_wins(&mut self.log, &other.log);
        right_wins(&mut self.on_conflict, &other.on_conflict);
        right_wins(&mut self.column, &other.column);
        right_wins(&mut self.coalesce_value, &other.coalesce_value);
        right_wins(&mut self.not_found_default, &other.not_found_default);
        right_wins(&mut self.soft_delete, &other.soft_delete);
        right_wins(
            &mut self.auto_prepared_statements,
            &other.auto_prepared_statements,
        );
        if self.error.is_none() {
            self.error = other.error.clone();
        }

        if other.return_type_set || other.return_type != ReturnType::default() {
            self.return_type = other.return_type;
            self.return_type_set = true;
        }
        // `Select` is never chosen explicitly; a right-side select keeps the
        // left's kind.
        if other.kind != QueryKind::default() {
            self.kind = other.kind;
        }

        self.only |= other.only;
        self.restart_identity |= other.restart_identity;
        self.cascade |= other.cascade;
        self.all_rows |= other.all_rows;
        self.hard_delete |= other.hard_delete;
        self.wrap_in_transaction |= other.wrap_in_transaction;
        self.throw_on_not_found |= other.throw_on_not_found;
        self.none |= other.none;

        if !other.shape.is_empty() {
            self.shape = Arc::new(self.shape.merged(&other.shape));
        }
        self.parsers
            .extend(other.parsers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.defaults
            .extend(other.defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.scope_defs
            .extend(other.scope_defs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.scopes
            .extend(other.scopes.iter().map(|(k, v)| (k.clone(), v.clone())));
        merge_keyed(&mut self.joined_shapes, &other.joined_shapes);
        merge_keyed(&mut self.with_shapes, &other.with_shapes);

        self.select.extend(other.select.iter().cloned());
        if let Some(right) = &other.distinct {
            self.distinct
                .get_or_insert_with(Vec::new)
                .extend(right.iter().cloned());
        }
        self.where_and.extend(other.where_and.iter().cloned());
        self.where_or.extend(other.where_or.iter().cloned());
        self.having_and.extend(other.having_and.iter().cloned());
        self.having_or.extend(other.having_or.iter().cloned());
        self.join.extend(other.join.iter().cloned());
        self.with.extend(other.with.iter().cloned());
        self.group.extend(other.group.iter().cloned());
        self.order.extend(other.order.iter().cloned());
        self.window.extend(other.window.iter().cloned());
        self.union.extend(other.union.iter().cloned());
        self.update.extend(other.update.iter().cloned());
        self.returning.extend(other.returning.iter().cloned());
        self.using.extend(other.using.iter().cloned());
        self.after_select.extend(other.after_select.iter().cloned());
        self.hooks.extend(&other.hooks);

        self.insert = match (self.insert.take(), &other.insert) {
            (Some(InsertSource::Rows(mut left)), Some(InsertSource::Rows(right))) => {
                left.extend(right.iter().cloned());
                Some(InsertSource::Rows(left))
            }
            (left, None) => left,
            (_, Some(right)) => Some(right.clone()),
        };

        self
    }
}
