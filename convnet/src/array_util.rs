use ndarray::prelude::*;
use ndarray::ShapeBuilder;

/// Number of elements per example in a batch of shape `shape` (axis 0 is the
/// mini-batch axis).
pub fn example_size<D: Dimension>(shape: &D) -> usize {
    shape.slice()[1..].iter().product()
}

fn compute_strides_splitting<D1, D2>(
    view_shape: D1,
    view_strides: &[isize],
    new_shape: D2,
) -> D2
where
    D1: Dimension,
    D2: Dimension,
{
    assert_eq!(
        view_shape.size(),
        new_shape.size(),
        "existing view with shape {view_shape:?} is incompatible with new shape {new_shape:?}",
    );
    if new_shape.size() == 0 {
        return new_shape.default_strides();
    }

    let new_dims = new_shape.as_array_view();
    let mut new_strides = D2::zeros(new_dims.len());
    let mut new_strides_view = new_strides.as_array_view_mut();
    let mut i = 0;
    let mut new_dims = new_dims.iter().copied();

    let view_dims = view_shape.as_array_view();
    for (&stride, &len) in view_strides.iter().zip(view_dims) {
        let mut remaining = len;
        while remaining != 1 {
            let d = new_dims
                .next()
                .expect("already checked that product matches shape");
            assert_eq!(
                remaining % d,
                0,
                "existing view with shape {view_shape:?} is incompatible with new shape {new_shape:?}",
            );
            remaining /= d;
            let ir = remaining as isize;
            assert!(ir > 0, "array size should be reasonable");
            new_strides_view[i] =
                stride
                    .checked_mul(ir)
                    .expect("array arithmetic can't overflow if existing view was ok")
                    as usize;
            i += 1;
        }
    }
    for spare_dim in new_dims {
        assert_eq!(spare_dim, 1);
        new_strides_view[i] = 0;
        i += 1;
    }
    assert_eq!(i, new_strides_view.len());

    new_strides
}

/// Reshape the given view.
///
/// The new shape must be the same size and must have the effect of splitting
/// existing axes without reordering them. Some examples of reshapes that do
/// and don't work:
///
/// -   `100` to `(10, 10)` - ok
/// -   `(10, 10)` to `100` - bad
/// -   `100` to `(2, 2, 5, 5)` - ok
/// -   `(2, 2, 5, 5)` to `100` - bad
/// -   `(6, 5)` to `(2, 3, 5)` - ok
/// -   `(6, 5)` to `(3, 5, 2)` - bad
///
/// This works by recomputing the strides. The strides of axes that aren't split
/// are unaffected, which is what lets a column range of the per-example
/// scratch matrix be viewed as a batch of images without copying.
///
/// The existing elements appear distributed along the new axes in "C" order.
///
/// *Panics* if the new shape is bad.
pub fn reshape_splitting<'a, T, D1, D2>(view: ArrayView<'a, T, D1>, shape: D2) -> ArrayView<'a, T, D2>
where
    D1: Dimension,
    D2: Dimension,
{
    let strides = compute_strides_splitting(view.raw_dim(), view.strides(), shape.clone());

    // SAFETY: the new strides address exactly the elements of `view`.
    unsafe { ArrayView::from_shape_ptr(shape.strides(strides), view.as_ptr()) }
}

pub fn reshape_splitting_mut<'a, T, D1, D2>(
    mut view: ArrayViewMut<'a, T, D1>,
    shape: D2,
) -> ArrayViewMut<'a, T, D2>
where
    D1: Dimension,
    D2: Dimension,
{
    let strides = compute_strides_splitting(view.raw_dim(), view.strides(), shape.clone());

    let ptr = view.as_mut_ptr();
    // SAFETY: `view` is consumed, so the new view is the only one aliasing
    // these elements.
    unsafe { ArrayViewMut::from_shape_ptr(shape.strides(strides), ptr) }
}
